//! Command line front end: loads data files and evaluates expressions over
//! the loaded items.
//!
//! ```text
//! exhibit [--config FILE] [--errors POLICY] [--item ID] DATA.json... [-e EXPRESSION]...
//! ```
//!
//! Without `--item` an expression sees every loaded item as `value`.
//! Each result is printed as one JSON line.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;
use tracing::error;
use tracing_subscriber::EnvFilter;

use exhibit::exhibit::Exhibit;
use exhibit::expression::Roots;
use exhibit::loader::load_links;
use exhibit::settings::Settings;
use exhibit::Result;

#[derive(Debug, Parser)]
#[command(name = "exhibit", about = "Load exhibit data and evaluate expressions over it", version)]
struct Arguments {
    /// Configuration file (toml, json, yaml)
    #[arg(long)]
    config: Option<String>,

    /// Error policy: throw, log-and-throw or log
    #[arg(long)]
    errors: Option<String>,

    /// Evaluate against this item instead of every loaded item
    #[arg(long)]
    item: Option<String>,

    /// Expression to evaluate, may be repeated
    #[arg(short = 'e', long = "eval")]
    expressions: Vec<String>,

    /// JSON data files, loaded in order
    links: Vec<PathBuf>,
}

async fn run(arguments: Arguments) -> Result<()> {
    let mut settings = Settings::load(arguments.config.as_deref())?;
    if let Some(errors) = &arguments.errors {
        settings.errors = errors.parse()?;
    }
    let mut exhibit = Exhibit::new(settings);
    load_links(&mut exhibit, &arguments.links).await?;
    let roots = match &arguments.item {
        Some(item) => Roots::item(item),
        None => Roots::items(exhibit.database().get_all_items()),
    };
    for source in &arguments.expressions {
        let results = exhibit.evaluate(source, &roots)?;
        let line = json!({
            "expression": source,
            "valueType": results.value_type(),
            "values": results.to_vec(),
        });
        println!("{}", line);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("exhibit=info")))
        .with_writer(std::io::stderr)
        .init();
    match run(Arguments::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "exhibit failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn arguments_are_well_formed() {
        Arguments::command().debug_assert();
    }

    #[test]
    fn expressions_repeat_and_links_collect() {
        let arguments = Arguments::try_parse_from([
            "exhibit", "--errors", "log", "-e", ".label", "--eval", "count(.age)", "a.json", "b.json",
        ])
        .unwrap();
        assert_eq!(arguments.expressions, vec![".label", "count(.age)"]);
        assert_eq!(arguments.links, vec![PathBuf::from("a.json"), PathBuf::from("b.json")]);
        assert_eq!(arguments.errors.as_deref(), Some("log"));
        assert!(arguments.item.is_none());
        assert!(Arguments::try_parse_from(["exhibit", "--item"]).is_err());
    }
}
