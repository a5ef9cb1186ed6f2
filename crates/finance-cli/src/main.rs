use clap::Parser;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde_json::{Value, json};
use std::error::Error;
use std::path::{Path, PathBuf};

const API_BASE_URL: &str = "http://localhost:3030";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of a running finance-api
    #[clap(long, default_value = API_BASE_URL)]
    api_url: String,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Print the combined text extracted from the files
    Extract {
        /// Report files (pdf, docx, md, txt); only the first 3 are used
        #[clap(short, long = "file", required = true)]
        files: Vec<PathBuf>,
    },
    /// Suggest three questions about the reports
    Suggest {
        #[clap(short, long = "file", required = true)]
        files: Vec<PathBuf>,
    },
    /// Answer a question about the reports in Markdown
    Analyze {
        #[clap(short, long = "file", required = true)]
        files: Vec<PathBuf>,
        /// The question to ask
        #[clap(short, long, conflicts_with = "suggestion")]
        query: Option<String>,
        /// Ask suggested question 1, 2 or 3 instead of writing one
        #[clap(short, long)]
        suggestion: Option<usize>,
        /// Also save the answer as Markdown to this path
        #[clap(short, long)]
        export: Option<PathBuf>,
    },
}

/// Reads the files in the order given, keeping only the file name for the upload.
async fn read_documents(paths: &[PathBuf]) -> std::io::Result<Vec<(String, Vec<u8>)>> {
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        documents.push((name, tokio::fs::read(path).await?));
    }
    Ok(documents)
}

async fn ensure_success(response: Response) -> Result<Response, Box<dyn Error>> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(format!("{} - {}", status, body).into())
    }
}

struct ApiSession<'a> {
    client: &'a Client,
    url: String,
}

impl<'a> ApiSession<'a> {
    async fn start(client: &'a Client, api_url: &str) -> Result<Self, Box<dyn Error>> {
        let response =
            ensure_success(client.post(format!("{}/sessions", api_url)).send().await?).await?;
        let body: Value = response.json().await?;
        let session_id = body["session_id"]
            .as_str()
            .ok_or("API did not return a session id")?;
        tracing::debug!("Started session {}", session_id);
        Ok(Self {
            client,
            url: format!("{}/sessions/{}", api_url, session_id),
        })
    }

    async fn upload(&self, paths: &[PathBuf]) -> Result<(), Box<dyn Error>> {
        let mut form = Form::new();
        for (name, bytes) in read_documents(paths).await? {
            tracing::info!("Uploading {} ({} bytes)", name, bytes.len());
            form = form.part("file", Part::bytes(bytes).file_name(name));
        }
        let response = ensure_success(
            self.client
                .put(format!("{}/documents", self.url))
                .multipart(form)
                .send()
                .await?,
        )
        .await?;

        let body: Value = response.json().await?;
        for notice in body["notices"].as_array().into_iter().flatten() {
            eprintln!(
                "{}: {}",
                notice["severity"].as_str().unwrap_or("notice"),
                notice["message"].as_str().unwrap_or_default()
            );
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Response, Box<dyn Error>> {
        ensure_success(self.client.get(format!("{}/{}", self.url, path)).send().await?).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Response, Box<dyn Error>> {
        ensure_success(
            self.client
                .post(format!("{}/{}", self.url, path))
                .json(&body)
                .send()
                .await?,
        )
        .await
    }

    async fn end(self) {
        if let Err(e) = self.client.delete(&self.url).send().await {
            tracing::warn!("Could not end session: {}", e);
        }
    }
}

async fn suggestions(session: &ApiSession<'_>) -> Result<Vec<String>, Box<dyn Error>> {
    let body: Value = session.get("suggestions").await?.json().await?;
    Ok(body["suggestions"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|s| s.as_str().map(String::from))
        .collect())
}

async fn run(session: &ApiSession<'_>, command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Extract { files } => {
            session.upload(&files).await?;
            let body: Value = session.get("text").await?.json().await?;
            println!("{}", body["text"].as_str().unwrap_or_default());
        }
        Commands::Suggest { files } => {
            session.upload(&files).await?;
            for (i, suggestion) in suggestions(session).await?.iter().enumerate() {
                println!("{}. {}", i + 1, suggestion);
            }
        }
        Commands::Analyze {
            files,
            query,
            suggestion,
            export,
        } => {
            session.upload(&files).await?;
            if let Some(index) = suggestion {
                suggestions(session).await?;
                let body: Value = session
                    .post(&format!("suggestions/{}/select", index), json!({}))
                    .await?
                    .json()
                    .await?;
                eprintln!("Query: {}", body["query"].as_str().unwrap_or_default());
            }

            let body: Value = session
                .post("analyze", json!({ "query": query }))
                .await?
                .json()
                .await?;
            println!("{}", body["markdown"].as_str().unwrap_or_default());

            if let Some(path) = export {
                let markdown = session.get("export").await?.text().await?;
                write_export(&path, &markdown).await?;
                eprintln!("Saved analysis to {}", path.display());
            }
        }
    }
    Ok(())
}

async fn write_export(path: &Path, markdown: &str) -> std::io::Result<()> {
    tokio::fs::write(path, markdown).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let client = Client::new();

    let session = ApiSession::start(&client, &cli.api_url).await?;
    let result = run(&session, cli.command).await;
    session.end().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn documents_keep_order_and_file_names() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("q2.md");
        let second = dir.path().join("q1.txt");
        fs::write(&first, "# Q2").unwrap();
        fs::write(&second, "Q1 revenue").unwrap();

        let documents = read_documents(&[first, second]).await.unwrap();
        assert_eq!(documents[0], ("q2.md".to_string(), b"# Q2".to_vec()));
        assert_eq!(documents[1], ("q1.txt".to_string(), b"Q1 revenue".to_vec()));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(read_documents(&[dir.path().join("nope.pdf")]).await.is_err());
    }

    #[tokio::test]
    async fn export_writes_markdown_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("financial_analysis.md");
        write_export(&path, "| Metric | Value |\n").await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "| Metric | Value |\n");
    }

    #[test]
    fn query_and_suggestion_conflict() {
        let parsed = Cli::try_parse_from([
            "finance-cli", "analyze", "-f", "a.txt", "-q", "Revenue?", "-s", "1",
        ]);
        assert!(parsed.is_err());
    }
}
