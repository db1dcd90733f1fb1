use clap::Parser;
use speedprobe::{Config, HttpChannel, SpeedTest, TestEvent, TestReport};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "speedprobe")]
#[command(about = "Two-stage network speed test with endpoint fallback", long_about = None)]
#[command(version)]
struct Cli {
    /// Download endpoint to try, in order; repeat to build a fallback list
    #[arg(short = 'd', long = "download-url")]
    download_urls: Vec<String>,

    /// Upload endpoint
    #[arg(short = 'u', long)]
    upload_url: Option<String>,

    /// Upload payload size in MiB
    #[arg(long, default_value = "5")]
    upload_mib: u64,

    /// Per-endpoint download timeout in seconds
    #[arg(short = 't', long, default_value = "30")]
    timeout: u64,

    /// Pause between the download and upload stages in milliseconds
    #[arg(long, default_value = "1000")]
    pause_ms: u64,

    /// Output the final report in JSON format
    #[arg(short = 'J', long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let mut config = Config::new()
        .with_upload_bytes(cli.upload_mib * 1024 * 1024)
        .with_attempt_timeout(Duration::from_secs(cli.timeout))
        .with_stage_pause(Duration::from_millis(cli.pause_ms));
    if !cli.download_urls.is_empty() {
        config = config.with_download_urls(cli.download_urls.clone());
    }
    if let Some(url) = cli.upload_url.clone() {
        config = config.with_upload_url(url);
    }

    let channel = Arc::new(HttpChannel::new()?);
    let quiet = cli.json;
    let test = Arc::new(
        SpeedTest::new(config, channel)?.with_callback(move |event: TestEvent| {
            if !quiet {
                print_event(event);
            }
        }),
    );

    // Ctrl-C aborts the active run and returns the engine to idle.
    let test_for_signal = test.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            test_for_signal.reset();
        }
    });

    let report = test.run().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_event(event: TestEvent) {
    match event {
        TestEvent::StageStarted { status_text, .. } => {
            println!("{status_text}");
        }
        TestEvent::Progress {
            percent,
            elapsed_seconds,
            ..
        } => {
            if let Some(percent) = percent {
                print!("\r  {percent:5.1}%  {elapsed_seconds:5.1}s");
            } else {
                print!("\r  uploading...  {elapsed_seconds:5.1}s");
            }
            let _ = std::io::stdout().flush();
        }
        TestEvent::SpeedUpdate { smoothed_speed_mbps } => {
            print!("  {smoothed_speed_mbps:6.2} Mbps");
            let _ = std::io::stdout().flush();
        }
        TestEvent::StageResult { stage, speed_mbps } => {
            println!("\r{stage}: {speed_mbps:.2} Mbps            ");
        }
        TestEvent::Error { message } => {
            eprintln!("\rspeed test failed: {message}");
        }
        TestEvent::Complete { .. } | TestEvent::Ready => {}
    }
}

fn print_report(report: &TestReport) {
    println!("- - - - - - - - - - - - - - - - - - - - - - - - -");
    println!("Download:   {:8.2} Mbps", report.download_mbps);
    println!("Upload:     {:8.2} Mbps", report.upload_mbps);
    println!("Total time: {:8.2} s", report.total_elapsed.as_secs_f64());
}
