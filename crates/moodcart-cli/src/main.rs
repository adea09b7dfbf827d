use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moodcart_hw::{Camera, CaptureConstraints};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[zbus::proxy(
    interface = "org.moodcart.Assistant1",
    default_service = "org.moodcart.Assistant1",
    default_path = "/org/moodcart/Assistant1"
)]
trait Assistant {
    async fn start_camera(&self) -> zbus::Result<()>;
    async fn stop_camera(&self) -> zbus::Result<()>;
    async fn analyze_and_recommend(
        &self,
        target_price: u64,
        category: &str,
    ) -> zbus::Result<String>;
    async fn search_by_category(&self, category: &str) -> zbus::Result<String>;
    async fn current_expression(&self) -> zbus::Result<String>;
    async fn get_product(&self, id: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "moodcart", about = "Moodcart emotion-aware shopping assistant CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the camera and expression sampling
    Start,
    /// Stop the camera
    Stop,
    /// Show daemon status
    Status,
    /// Print the detected expression as it changes
    Watch {
        /// Polling interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Recommend products for a target price, shaped by your expression
    Recommend {
        /// Target price
        #[arg(short, long)]
        price: u64,
        /// Category filter ("all" for none)
        #[arg(short, long)]
        category: Option<String>,
    },
    /// List products in a category
    Category {
        /// Category name, e.g. "Apparel"
        name: String,
    },
    /// Show product details
    Product {
        /// Catalog product ID
        id: String,
    },
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// V4L2 device to capture from
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        /// Save the captured frame as an image
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            connect().await?.start_camera().await?;
            println!("Camera started");
        }
        Commands::Stop => {
            connect().await?.stop_camera().await?;
            println!("Camera stopped");
        }
        Commands::Status => {
            let status: Value = serde_json::from_str(&connect().await?.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Watch { interval_ms } => {
            let proxy = connect().await?;
            watch(&proxy, Duration::from_millis(interval_ms.max(50))).await?;
        }
        Commands::Recommend { price, category } => {
            let reply = connect()
                .await?
                .analyze_and_recommend(price, category.as_deref().unwrap_or(""))
                .await?;
            print_recommendations(&serde_json::from_str(&reply)?);
        }
        Commands::Category { name } => {
            let reply = connect().await?.search_by_category(&name).await?;
            print_recommendations(&serde_json::from_str(&reply)?);
        }
        Commands::Product { id } => {
            let product: Value = serde_json::from_str(&connect().await?.get_product(&id).await?)?;
            println!("{}", serde_json::to_string_pretty(&product)?);
        }
        Commands::Test { device, save } => {
            run_diagnostics(&device, save.as_deref())?;
        }
    }

    Ok(())
}

async fn connect() -> Result<AssistantProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    AssistantProxy::new(&conn)
        .await
        .context("moodcartd is not reachable")
}

async fn watch(proxy: &AssistantProxy<'_>, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut last = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = ticker.tick() => {
                let reply = proxy.current_expression().await?;
                if reply == last {
                    continue;
                }
                let detection: Value = serde_json::from_str(&reply)?;
                println!("{}", describe_detection(&detection));
                last = reply;
            }
        }
    }
}

fn describe_detection(detection: &Value) -> String {
    match detection.get("dominant_emotion").and_then(Value::as_str) {
        Some(emotion) => {
            let confidence = detection["confidence"].as_f64().unwrap_or_default();
            format!("{emotion} ({:.0}%)", confidence * 100.0)
        }
        None => "no face".to_string(),
    }
}

fn print_recommendations(state: &Value) {
    if let Some(message) = state["message"].as_str().filter(|m| !m.is_empty()) {
        println!("{message}");
    }
    if let Some(error) = state["error"].as_str() {
        println!("Catalog unavailable: {error}");
    }
    let products = state["products"].as_array().map(Vec::as_slice).unwrap_or_default();
    if products.is_empty() {
        println!("No products found");
        return;
    }
    for product in products {
        println!(
            "  {:<10} {:>10}  {}",
            product["id"].as_str().unwrap_or("?"),
            product["price"].as_str().unwrap_or("?"),
            product["display_name"].as_str().unwrap_or(""),
        );
    }
}

fn run_diagnostics(device: &str, save: Option<&std::path::Path>) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    tracing::debug!(device, "opening camera");
    let camera = Camera::open(device, &CaptureConstraints::default())?;
    println!("Opened {} at {}x{}", camera.device_path, camera.width, camera.height);

    let frame = camera.capture_frame()?;
    let mean = frame.data.iter().map(|&p| p as u64).sum::<u64>() / frame.data.len().max(1) as u64;
    println!("Captured frame #{} (mean brightness {mean})", frame.sequence);

    if let Some(path) = save {
        image::GrayImage::from_raw(frame.width, frame.height, frame.data)
            .context("frame buffer does not match its dimensions")?
            .save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("Saved frame to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_detection() {
        let d = json!({"dominant_emotion": "sad", "confidence": 0.8});
        assert_eq!(describe_detection(&d), "sad (80%)");
        assert_eq!(describe_detection(&Value::Null), "no face");
    }

    #[test]
    fn test_cli_parses_recommend() {
        let cli = Cli::try_parse_from([
            "moodcart",
            "recommend",
            "--price",
            "1000",
            "--category",
            "Apparel",
        ])
        .unwrap();
        match cli.command {
            Commands::Recommend { price, category } => {
                assert_eq!(price, 1000);
                assert_eq!(category.as_deref(), Some("Apparel"));
            }
            _ => panic!("expected recommend"),
        }
    }
}
