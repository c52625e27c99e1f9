//! Entry point for sentinel_tail. Parses args and prints the live feed, one event per line.

use std::env;

use sentinel_tail::ws::{close, connect, next_event, next_text};
use url::Url;

const DEFAULT_URL: &str = "ws://127.0.0.1:3001/ws";

struct ParsedArgs {
    url: Option<String>,
    token: Option<String>,
    json: bool,
}

fn usage(prog: &str) -> String {
    format!("Usage: {prog} [--token TOKEN|-k TOKEN] [--json] [ws://HOST:PORT/ws]")
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "sentinel_tail".into());
    let mut url: Option<String> = None;
    let mut token: Option<String> = None;
    let mut json = false;

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage(&prog)),
            "--token" | "-k" => {
                token = it.next();
            }
            "--json" => {
                json = true;
            }
            _ if arg.starts_with("--token=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        token = Some(v.to_string());
                    }
                }
            }
            _ => {
                if url.is_none() {
                    url = Some(arg);
                } else {
                    return Err(format!("Unexpected argument. {}", usage(&prog)));
                }
            }
        }
    }
    Ok(ParsedArgs { url, token, json })
}

fn feed_url(raw: &str, token: Option<&str>) -> anyhow::Result<String> {
    let mut url = Url::parse(raw)?;
    if let Some(t) = token {
        url.query_pairs_mut().append_pair("token", t);
    }
    Ok(url.into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    let url = feed_url(
        parsed.url.as_deref().unwrap_or(DEFAULT_URL),
        parsed.token.as_deref(),
    )?;
    let mut ws = connect(&url).await?;
    eprintln!("following {}", parsed.url.as_deref().unwrap_or(DEFAULT_URL));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = async {
                if parsed.json {
                    next_text(&mut ws).await
                } else {
                    next_event(&mut ws).await.map(|ev| ev.summary_line())
                }
            } => match line {
                Some(l) => println!("{l}"),
                None => {
                    eprintln!("feed closed by agent");
                    return Ok(());
                }
            },
        }
    }
    close(&mut ws).await;
    Ok(())
}
