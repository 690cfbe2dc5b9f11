use std::sync::Arc;

use anyhow::Context;
use dirview::api_fetcher::ApiFetcher;
use dirview::config::ViewConfig;
use dirview::item::{Item, Readiness};
use dirview::path::FolderPath;
use dirview::service::DirectoryService;
use dirview::token_provider::{SessionState, TokenProvider};
use dirview_core::{SessionClient, StoreClient};
use futures_util::StreamExt;

const DEFAULT_TREE_DEPTH: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    List { folder: String, public: bool },
    Tree { folder: String, depth: u32, public: bool },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(CliMode::Help);
    };
    if matches!(command.as_str(), "--help" | "-h" | "help") {
        return Ok(CliMode::Help);
    }

    let mut folder = None;
    let mut public = false;
    let mut depth = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--public" => public = true,
            "--help" | "-h" => return Ok(CliMode::Help),
            "--depth" => {
                let value = args.next().context("--depth needs a value")?;
                depth = Some(
                    value
                        .parse::<u32>()
                        .with_context(|| format!("invalid depth: {value}"))?,
                );
            }
            other if other.starts_with("--") => anyhow::bail!("unknown argument: {other}"),
            other => {
                if folder.replace(other.to_string()).is_some() {
                    anyhow::bail!("only one folder may be given");
                }
            }
        }
    }
    let folder = folder.unwrap_or_else(|| "/".to_string());

    match command.as_str() {
        "ls" => {
            if depth.is_some() {
                anyhow::bail!("--depth only applies to tree");
            }
            Ok(CliMode::List { folder, public })
        }
        "tree" => Ok(CliMode::Tree {
            folder,
            depth: depth.unwrap_or(DEFAULT_TREE_DEPTH),
            public,
        }),
        other => anyhow::bail!("unknown command: {other}"),
    }
}

fn describe(item: &Item) -> String {
    let state = match item.readiness() {
        Readiness::Pending => "pending",
        Readiness::Ready => "ready",
        Readiness::Deleted => "deleted",
    };
    match item {
        Item::File(file) => format!("file\t{state}\t{}\t{}", file.size(), file.path()),
        Item::Folder(folder) => format!("dir\t{state}\t-\t{}", folder.path()),
    }
}

fn build_service(config: &ViewConfig) -> anyhow::Result<DirectoryService<ApiFetcher>> {
    let client = StoreClient::with_base_url(&config.base_url, config.token.clone())
        .context("failed to build store client")?;
    let mut fetcher = ApiFetcher::new(client, config.page_size);
    if let Some(refresh_token) = &config.refresh_token {
        let session_client = match &config.auth_url {
            Some(url) => SessionClient::with_base_url(url, config.client_id.clone()),
            None => SessionClient::new(config.client_id.clone()),
        }
        .context("failed to build session client")?;
        let state = SessionState::new(config.token.clone(), Some(refresh_token.clone()));
        fetcher = fetcher.with_token_provider(TokenProvider::new(state, Some(session_client)));
    }
    Ok(DirectoryService::new(Arc::new(fetcher), config.reconcile))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: dirview <command> [folder] [options]");
        println!("  ls <folder> [--public]               List a folder");
        println!("  tree <folder> [--depth N] [--public] List files of a folder and its subfolders");
        return Ok(());
    }

    let config = ViewConfig::from_env()?;
    dirview::logging::init(&config.log_level)?;
    let service = build_service(&config)?;

    match mode {
        CliMode::List { folder, public } => {
            let folder = FolderPath::new(&folder, !public)?;
            let mut items = service
                .list_folder(&folder)
                .await
                .with_context(|| format!("failed to list {folder}"))?;
            while let Some(item) = items.next().await {
                println!("{}", describe(&item?));
            }
        }
        CliMode::Tree {
            folder,
            depth,
            public,
        } => {
            let folder = FolderPath::new(&folder, !public)?;
            let mut files = service
                .list_folder_files_recursive(&folder, depth)
                .await
                .with_context(|| format!("failed to walk {folder}"))?;
            while let Some(file) = files.next().await {
                println!("{}", describe(&Item::File(file?)));
            }
        }
        CliMode::Help => {}
    }
    service.clear_session().await;
    Ok(())
}
