//! # tq — command line client for TRIAGE
//!
//! - `tq search "is:unresolved browser:Chrome" --sort freq`: one page of issues.
//! - `tq resolve 12 14` / `tq resolve --query "level:warning"`: bulk resolve.
//! - `tq delete 12`: bulk delete.
//! - `tq cursor decode <token>`: inspect a pagination token offline.
//! - `tq hub`: launch the search service.
//!
//! Remote commands read `TQ_BASE_URL` and `TQ_API_KEY`.

use std::path::PathBuf;
use std::process::Command;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tabled::{Table, Tabled};

use tq_core::{Cursor, CursorValue};

/// 🔎 TRIAGE: issue search for an error tracker.
#[derive(Parser)]
#[command(name = "tq", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search issues and print one page.
    Search {
        /// Search query. Omit for unresolved issues, pass "" for all.
        query: Option<String>,

        #[arg(long, default_value_t = 1)]
        org: u64,

        /// priority, relevance, date, new, freq or inbox.
        #[arg(long)]
        sort: Option<String>,

        /// Project id, repeatable. -1 selects every project.
        #[arg(long)]
        project: Vec<i64>,

        #[arg(long)]
        environment: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Cursor token from a previous page.
        #[arg(long)]
        cursor: Option<String>,

        /// Treat the query as a short id such as BACKEND-12.
        #[arg(long)]
        short_id: bool,

        /// Print the raw JSON response.
        #[arg(long)]
        json: bool,
    },

    /// Resolve issues by id or by search.
    Resolve {
        ids: Vec<u64>,

        #[arg(long, default_value_t = 1)]
        org: u64,

        #[arg(long)]
        query: Option<String>,

        #[arg(long)]
        project: Vec<i64>,
    },

    /// Delete issues by id or by search.
    Delete {
        ids: Vec<u64>,

        #[arg(long, default_value_t = 1)]
        org: u64,

        #[arg(long)]
        query: Option<String>,

        #[arg(long)]
        project: Vec<i64>,
    },

    /// Encode or decode pagination cursors.
    Cursor {
        #[command(subcommand)]
        action: CursorCmd,
    },

    /// Report service status as JSON.
    Status,

    /// Launch the search service.
    Hub {
        /// Server bind address.
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: String,

        /// JSON dataset to serve.
        #[arg(long, default_value = "fixtures/demo.json")]
        data: PathBuf,

        #[arg(long, default_value = "tq-hub.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum CursorCmd {
    Decode {
        token: String,
    },
    Encode {
        /// Score; parsed as an integer, then a float, else kept as text.
        value: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        prev: bool,
    },
}

/// The columns of a search result worth a terminal row.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Issue {
    id: String,
    short_id: String,
    status: String,
    count: String,
    last_seen: DateTime<Utc>,
    title: String,
    assigned_to: Option<String>,
}

#[derive(Tabled)]
struct IssueRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "SHORT ID")]
    short_id: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "EVENTS")]
    count: String,
    #[tabled(rename = "LAST SEEN")]
    last_seen: String,
    #[tabled(rename = "ASSIGNEE")]
    assignee: String,
    #[tabled(rename = "TITLE")]
    title: String,
}

impl From<Issue> for IssueRow {
    fn from(issue: Issue) -> Self {
        Self {
            id: issue.id,
            short_id: issue.short_id,
            status: issue.status,
            count: issue.count,
            last_seen: age(issue.last_seen, Utc::now()),
            assignee: issue.assigned_to.unwrap_or_else(|| "-".into()),
            title: truncate(&issue.title, 60),
        }
    }
}

fn age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s ago", s),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn parse_cursor_value(raw: &str) -> CursorValue {
    if let Ok(v) = raw.parse::<i64>() {
        return CursorValue::Int(v);
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => CursorValue::Float(v),
        _ => CursorValue::Str(raw.to_string()),
    }
}

/// Cursor of the `rel="next"` link, if it has results.
fn next_cursor(link: &str) -> Option<String> {
    link.split(", ")
        .find(|part| part.contains("rel=\"next\"") && part.contains("results=\"true\""))
        .and_then(|part| part.split("cursor=\"").nth(1))
        .map(|rest| rest.trim_end_matches('"').to_string())
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Cursor { action } => match action {
            CursorCmd::Decode { token } => match Cursor::decode(&token) {
                Ok(cursor) => {
                    println!("value:   {}", cursor.value);
                    println!("offset:  {}", cursor.offset);
                    println!("is_prev: {}", cursor.is_prev);
                }
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            },
            CursorCmd::Encode {
                value,
                offset,
                prev,
            } => match Cursor::new(parse_cursor_value(&value), offset, prev).encode() {
                Ok(token) => println!("{}", token),
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            },
        },

        Commands::Hub { bind, data, config } => {
            eprintln!("🔎 TRIAGE: Launching issue search service...");
            let status = Command::new("cargo")
                .args([
                    "run",
                    "--release",
                    "-p",
                    "tq-hub",
                    "--",
                    "--bind",
                    &bind,
                    "--data",
                    &data.display().to_string(),
                    "--config",
                    &config.display().to_string(),
                ])
                .status();

            match status {
                Ok(s) if s.success() => {}
                Ok(s) => {
                    eprintln!("Hub exited with: {}", s);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Failed to launch hub: {}", e);
                    std::process::exit(1);
                }
            }
        }

        // Async Commands
        cmd => {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to build tokio runtime: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(async_main(cmd)) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

async fn async_main(cmd: Commands) -> CliResult<()> {
    let client = reqwest::Client::new();
    let base_url =
        std::env::var("TQ_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());
    let api_key = std::env::var("TQ_API_KEY").ok();

    match cmd {
        Commands::Search {
            query,
            org,
            sort,
            project,
            environment,
            limit,
            cursor,
            short_id,
            json,
        } => {
            let mut params: Vec<(&str, String)> = Vec::new();
            if let Some(query) = query {
                params.push(("query", query));
            }
            if let Some(sort) = sort {
                params.push(("sort", sort));
            }
            params.extend(project.iter().map(|p| ("project", p.to_string())));
            params.extend(environment.into_iter().map(|e| ("environment", e)));
            if let Some(limit) = limit {
                params.push(("limit", limit.to_string()));
            }
            if let Some(cursor) = cursor {
                params.push(("cursor", cursor));
            }
            if short_id {
                params.push(("shortIdLookup", "1".into()));
            }

            let url = format!("{}/api/organizations/{}/issues", base_url, org);
            let resp = send(client.get(&url).query(&params), api_key.as_deref()).await?;
            let headers = resp.headers().clone();
            let body: serde_json::Value = resp.json().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&body)?);
                return Ok(());
            }
            let issues: Vec<Issue> = serde_json::from_value(body)?;
            let rows: Vec<IssueRow> = issues.into_iter().map(IssueRow::from).collect();
            println!("{}", Table::new(rows));

            if headers.contains_key("X-Sentry-Direct-Hit") {
                eprintln!("(direct hit)");
            }
            if let Some(hits) = headers.get("X-Hits").and_then(|v| v.to_str().ok()) {
                eprintln!("hits: {}", hits);
            }
            if let Some(next) = headers
                .get("Link")
                .and_then(|v| v.to_str().ok())
                .and_then(next_cursor)
            {
                eprintln!("next: --cursor {}", next);
            }
        }

        Commands::Resolve {
            ids,
            org,
            query,
            project,
        } => {
            let url = format!("{}/api/organizations/{}/issues", base_url, org);
            let params = mutation_params(&ids, query, &project);
            let payload = serde_json::json!({ "status": "resolved" });
            let resp = send(
                client.put(&url).query(&params).json(&payload),
                api_key.as_deref(),
            )
            .await?;
            print_json(resp).await?;
        }

        Commands::Delete {
            ids,
            org,
            query,
            project,
        } => {
            let url = format!("{}/api/organizations/{}/issues", base_url, org);
            let params = mutation_params(&ids, query, &project);
            let resp = send(client.delete(&url).query(&params), api_key.as_deref()).await?;
            print_json(resp).await?;
        }

        Commands::Status => {
            let url = format!("{}/api/status", base_url);
            let resp = send(client.get(&url), api_key.as_deref()).await?;
            print_json(resp).await?;
        }

        _ => {}
    }
    Ok(())
}

fn mutation_params(ids: &[u64], query: Option<String>, projects: &[i64]) -> Vec<(&'static str, String)> {
    let mut params: Vec<(&str, String)> = ids.iter().map(|id| ("id", id.to_string())).collect();
    if let Some(query) = query {
        params.push(("query", query));
    }
    params.extend(projects.iter().map(|p| ("project", p.to_string())));
    params
}

/// Send with the bearer key and turn error statuses into their `detail`.
async fn send(req: reqwest::RequestBuilder, key: Option<&str>) -> CliResult<reqwest::Response> {
    let req = match key {
        Some(k) => req.header("Authorization", format!("Bearer {}", k)),
        None => req,
    };
    let resp = req.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let detail = resp
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    Err(format!("{} ({})", detail, status).into())
}

async fn print_json(resp: reqwest::Response) -> CliResult<()> {
    let json = resp.json::<serde_json::Value>().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_next_cursor_from_link() {
        let link = "</api/organizations/1/issues?cursor=aaa>; rel=\"previous\"; results=\"false\"; cursor=\"aaa\", \
                    </api/organizations/1/issues?cursor=bbb>; rel=\"next\"; results=\"true\"; cursor=\"bbb\"";
        assert_eq!(next_cursor(link), Some("bbb".to_string()));
        assert_eq!(next_cursor(&link.replace("results=\"true\"", "results=\"false\"")), None);
    }

    #[test]
    fn test_cursor_values() {
        assert_eq!(parse_cursor_value("42"), CursorValue::Int(42));
        assert_eq!(parse_cursor_value("0.5"), CursorValue::Float(0.5));
        assert_eq!(parse_cursor_value("abc"), CursorValue::Str("abc".into()));
        assert_eq!(parse_cursor_value("NaN"), CursorValue::Str("NaN".into()));

        let token = Cursor::new(parse_cursor_value("1700000000000"), 2, true)
            .encode()
            .unwrap();
        let cursor = Cursor::decode(&token).unwrap();
        assert_eq!(cursor.offset, 2);
        assert!(cursor.is_prev);
    }

    #[test]
    fn test_row_formatting() {
        let now = Utc::now();
        assert_eq!(age(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(age(now - Duration::days(3), now), "3d ago");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5).chars().count(), 5);
        assert_eq!(
            mutation_params(&[3], None, &[1]),
            vec![("id", "3".to_string()), ("project", "1".to_string())]
        );
    }
}
