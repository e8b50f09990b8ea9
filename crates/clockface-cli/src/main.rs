use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use clockface_core::AttendanceKind;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "clockface", about = "clockface attendance CLI")]
struct Cli {
    /// Daemon base URL
    #[arg(long, env = "CLOCKFACE_SERVER", default_value = "http://127.0.0.1:5000")]
    server: String,

    /// Manager PIN for enrollment and reports
    #[arg(long, env = "CLOCKFACE_MANAGER_PIN", hide_env_values = true)]
    pin: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new employee
    Enroll {
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Unique employee id
        #[arg(short = 'i', long = "id")]
        employee_id: String,
        #[command(flatten)]
        face: FaceArgs,
    },
    /// Record a check-in for the presented face
    CheckIn {
        #[command(flatten)]
        face: FaceArgs,
    },
    /// Record a check-out for the presented face
    CheckOut {
        #[command(flatten)]
        face: FaceArgs,
    },
    /// Show one enrolled employee
    Employee {
        /// Employee id
        id: String,
    },
    /// Download the attendance report from the ledger (CSV)
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download the report as held by the external sink (CSV)
    SinkReport {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show daemon status
    Status,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct FaceArgs {
    /// JSON file holding a descriptor (array of numbers)
    #[arg(long)]
    descriptor: Option<PathBuf>,
    /// Face image file; the daemon extracts the descriptor
    #[arg(long)]
    image: Option<PathBuf>,
}

struct Client {
    http: reqwest::Client,
    base: String,
    pin: Option<String>,
}

impl Client {
    fn new(server: &str, pin: Option<String>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base: server.trim_end_matches('/').to_string(),
            pin,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn manager(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let pin = self
            .pin
            .as_deref()
            .context("this command needs the manager PIN (--pin or CLOCKFACE_MANAGER_PIN)")?;
        Ok(req.bearer_auth(pin))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<String> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("failed to reach clockfaced at {}", self.base))?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            bail!("{}", describe_error(status.as_u16(), &body));
        }
        Ok(body)
    }
}

/// Render an API error body as `CODE: message`, falling back to the raw body.
fn describe_error(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|v| v["error"]["code"].as_str());
    let message = parsed.as_ref().and_then(|v| v["error"]["message"].as_str());
    match (code, message) {
        (Some(code), Some(message)) => format!("{code}: {message} (HTTP {status})"),
        _ => format!("HTTP {status}: {}", body.trim()),
    }
}

fn read_descriptor(path: &Path) -> Result<Vec<f32>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))
}

fn encode_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let img = image::load_from_memory(&bytes)
        .with_context(|| format!("{} is not a readable image", path.display()))?;
    tracing::debug!(width = img.width(), height = img.height(), "image loaded");
    Ok(base64::engine::general_purpose::STANDARD.encode(&bytes))
}

fn face_fields(face: &FaceArgs) -> Result<serde_json::Map<String, Value>> {
    let mut fields = serde_json::Map::new();
    match (&face.descriptor, &face.image) {
        (Some(path), None) => {
            fields.insert("descriptor".into(), json!(read_descriptor(path)?));
        }
        (None, Some(path)) => {
            fields.insert("image".into(), json!(encode_image(path)?));
        }
        _ => bail!("pass exactly one of --descriptor or --image"),
    }
    Ok(fields)
}

fn write_report(csv: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{csv}"),
    }
    Ok(())
}

async fn mark(client: &Client, face: &FaceArgs, kind: AttendanceKind) -> Result<()> {
    let mut body = face_fields(face)?;
    body.insert("type".into(), json!(kind.as_str()));
    let resp = client
        .send(client.http.post(client.url("/api/mark-attendance")).json(&body))
        .await?;
    let resp: Value = serde_json::from_str(&resp)?;
    println!(
        "{} for {} ({}) at {}",
        resp["message"].as_str().unwrap_or("Recorded"),
        resp["employee"]["name"].as_str().unwrap_or("?"),
        resp["employee"]["employeeId"].as_str().unwrap_or("?"),
        resp["event"]["timestamp"].as_str().unwrap_or("?"),
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server, cli.pin)?;

    match cli.command {
        Commands::Enroll {
            name,
            employee_id,
            face,
        } => {
            let mut body = face_fields(&face)?;
            body.insert("name".into(), json!(name));
            body.insert("employeeId".into(), json!(employee_id));
            let req = client.manager(client.http.post(client.url("/api/register")).json(&body))?;
            client.send(req).await?;
            println!("Enrolled {name} as {employee_id}");
        }
        Commands::Employee { id } => {
            let req = client.manager(client.http.get(client.url(&format!("/api/employees/{id}"))))?;
            let body = client.send(req).await?;
            let employee: Value = serde_json::from_str(&body)?;
            println!(
                "{} ({}), enrolled {}",
                employee["name"].as_str().unwrap_or("?"),
                employee["employeeId"].as_str().unwrap_or("?"),
                employee["enrolledAt"].as_str().unwrap_or("?"),
            );
        }
        Commands::CheckIn { face } => mark(&client, &face, AttendanceKind::CheckIn).await?,
        Commands::CheckOut { face } => mark(&client, &face, AttendanceKind::CheckOut).await?,
        Commands::Export { output } => {
            let req = client.manager(client.http.get(client.url("/api/export-attendance")))?;
            let csv = client.send(req).await?;
            write_report(&csv, output.as_deref())?;
        }
        Commands::SinkReport { output } => {
            let req = client.manager(client.http.get(client.url("/api/sink-report")))?;
            let csv = client.send(req).await?;
            write_report(&csv, output.as_deref())?;
        }
        Commands::Status => {
            let body = client.send(client.http.get(client.url("/healthz"))).await?;
            let status: Value = serde_json::from_str(&body)?;
            println!("clockfaced {}", status["version"].as_str().unwrap_or("?"));
            println!("  employees:        {}", status["employees"]);
            println!("  events:           {}", status["events"]);
            println!("  report sink:      {}", on_off(&status["sinkEnabled"]));
            println!("  image extraction: {}", on_off(&status["extractorConfigured"]));
            println!("  match threshold:  {}", status["matchThreshold"]);
            println!("  descriptor dim:   {}", status["descriptorDim"]);
        }
    }

    Ok(())
}

fn on_off(v: &Value) -> &'static str {
    if v.as_bool().unwrap_or(false) {
        "enabled"
    } else {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_face_source_is_exclusive() {
        assert!(Cli::try_parse_from(["clockface", "check-in"]).is_err());
        assert!(Cli::try_parse_from([
            "clockface",
            "check-in",
            "--descriptor",
            "d.json",
            "--image",
            "f.png"
        ])
        .is_err());
        let cli = Cli::try_parse_from(["clockface", "employee", "E1"]).unwrap();
        assert!(matches!(cli.command, Commands::Employee { id } if id == "E1"));
        let cli = Cli::try_parse_from(["clockface", "check-out", "--image", "f.png"]).unwrap();
        assert!(matches!(cli.command, Commands::CheckOut { face } if face.image.is_some()));
    }

    #[test]
    fn test_read_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(&good, "[0.5, -1, 2.25]").unwrap();
        assert_eq!(read_descriptor(&good).unwrap(), vec![0.5, -1.0, 2.25]);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{\"values\": []}").unwrap();
        assert!(read_descriptor(&bad).is_err());
    }

    #[test]
    fn test_encode_image_rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("face.png");
        image::RgbImage::new(4, 4).save(&png).unwrap();
        let encoded = encode_image(&png).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, std::fs::read(&png).unwrap());

        let txt = dir.path().join("face.txt");
        std::fs::write(&txt, "hello").unwrap();
        assert!(encode_image(&txt).is_err());
    }

    #[test]
    fn test_describe_error() {
        let body = r#"{"error":{"code":"NO_MATCH","message":"Employee not recognized"}}"#;
        assert_eq!(
            describe_error(404, body),
            "NO_MATCH: Employee not recognized (HTTP 404)"
        );
        assert_eq!(describe_error(502, "bad gateway\n"), "HTTP 502: bad gateway");
    }
}
