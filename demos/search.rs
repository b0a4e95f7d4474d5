//! Search an LDAP server through a multiplexed connection
//!
//! ```text
//! cargo run --example search -- ldap.toml "ou=people,dc=example,dc=com" "(uid=jdoe)"
//! ```
//!
//! The filter argument accepts `attr=value` or `attr=*` only.

use std::sync::Arc;
use anyhow::{bail, Context};
use ldapmux::connection::SearchResultHandler;
use ldapmux::protocol::{Filter, SearchRequest, SearchResultEntry, SearchResultReference, SearchScope};
use ldapmux::{logger, ConnectionEventListener, LdapClientConfig, LdapConnectionFactory, LdapError};

struct PrintEntries;

impl SearchResultHandler for PrintEntries {
    fn handle_entry(&self, entry: SearchResultEntry) {
        println!("dn: {}", entry.dn);
        for attribute in &entry.attributes {
            for value in &attribute.values {
                println!("{}: {}", attribute.name, String::from_utf8_lossy(value));
            }
        }
        println!();
    }

    fn handle_reference(&self, reference: SearchResultReference) {
        for uri in &reference.uris {
            println!("ref: {}", uri);
        }
    }
}

struct LogEvents;

impl ConnectionEventListener for LogEvents {
    fn connection_error(&self, is_disconnect_notification: bool, error: &LdapError) {
        eprintln!("connection failed (server notice: {}): {}", is_disconnect_notification, error);
    }
}

fn parse_filter(text: &str) -> anyhow::Result<Filter> {
    let text = text.trim().trim_start_matches('(').trim_end_matches(')');
    let Some((attribute, value)) = text.split_once('=') else {
        bail!("unsupported filter: {}", text);
    };
    Ok(match value {
        "*" => Filter::present(attribute),
        _ => Filter::equality(attribute, value),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <config.toml> <base dn> [filter]", args[0]);
    }

    let config = LdapClientConfig::from_file(&args[1]).with_context(|| format!("loading {}", args[1]))?;
    logger::init(config.log_level()?);

    let filter = parse_filter(args.get(3).map(String::as_str).unwrap_or("(objectClass=*)"))?;
    let factory = LdapConnectionFactory::from_config(&config)?;
    let connection = factory.get_connection().await.context("opening connection")?;
    connection.add_listener(Arc::new(LogEvents));

    let request = SearchRequest::new(args[2].as_str(), SearchScope::WholeSubtree, filter);
    let result = connection.search_async(request, Some(Arc::new(PrintEntries))).await?;
    println!("result: {} {}", result.result_code, result.diagnostic_message);

    connection.close();
    factory.close();
    Ok(())
}
