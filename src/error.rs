use thiserror::Error;

fn cors_hint(cors_likely: &bool) -> &'static str {
    if *cors_likely {
        " (the last failure looked like a CORS or network-level rejection)"
    } else {
        ""
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("a test is already in progress")]
    TestInProgress,

    #[error("all test servers are currently unavailable{}", cors_hint(.cors_likely))]
    EndpointsExhausted { cors_likely: bool },

    #[error("the upload test failed: {0}")]
    Upload(String),

    #[error("transfer finished with a zero-length duration, cannot compute a speed")]
    DegenerateTiming,

    #[error("test was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
