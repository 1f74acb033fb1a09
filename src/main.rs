use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing::info;

use viz_assistant::llm::LlmClient;
use viz_assistant::session::API_KEY_VAR;
use viz_assistant::{ResponseItem, Session};

#[derive(Parser)]
#[command(name = "viz-assistant")]
#[command(about = "Conversational data visualization over uploaded tables")]
struct Args {
    /// The question to ask about the uploaded data
    question: String,

    /// CSV files to upload before asking
    #[arg(short, long, required = true)]
    file: Vec<PathBuf>,

    /// Groq API key (or set GROQ_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Directory for rendered chart artifacts
    #[arg(short, long, default_value = "artifacts")]
    out_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let api_key = args
        .api_key
        .or_else(|| std::env::var(API_KEY_VAR).ok())
        .with_context(|| format!("no API key: pass --api-key or set {}", API_KEY_VAR))?;
    let mut session = Session::new(LlmClient::new(api_key));

    for path in &args.file {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.csv");
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let summary = session.upload(name, &bytes, extension)?;
        info!("{}", summary);
    }

    let messages = session.ask(&args.question).await?;

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    let mut chart_index = 0;
    for message in messages {
        match &message.item {
            ResponseItem::Text(text) => println!("{}\n", text),
            ResponseItem::Image(png) => {
                chart_index += 1;
                let path = args.out_dir.join(format!("chart_{}.png", chart_index));
                fs::write(&path, png)?;
                println!("[chart saved to {}]\n", path.display());
            }
            ResponseItem::Interactive(figure) => {
                chart_index += 1;
                let path = args.out_dir.join(format!("chart_{}.json", chart_index));
                fs::write(&path, serde_json::to_vec_pretty(&figure.to_spec())?)?;
                println!("[interactive chart saved to {}]\n", path.display());
            }
            ResponseItem::Declarative(chart) => {
                chart_index += 1;
                let path = args.out_dir.join(format!("chart_{}.html", chart_index));
                fs::write(&path, chart.to_html()?)?;
                println!("[chart saved to {}]\n", path.display());
            }
        }
    }

    Ok(())
}
