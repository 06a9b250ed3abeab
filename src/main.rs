use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use homedir::my_home;

mod audit;
mod catalog;
mod cli;
mod config;
mod eid;
mod embedding;
mod ranker;
mod search;
#[cfg(test)]
mod tests;
mod web;

use audit::{FileQueryLog, MemoryQueryLog, QueryLog};
use catalog::{seed, CatalogStore, MemoryCatalog};
use cli::{Command, ImageArgs};
use config::Config;
use embedding::EmbeddingExtractor;
use search::{ImageSource, SearchRequest, SearchService};

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let base_path = match args.base_path {
        Some(path) => path,
        None => get_base_path()?,
    };
    std::fs::create_dir_all(&base_path)
        .with_context(|| format!("failed to create {}", base_path.display()))?;

    let config = Config::load_with(&base_path)?;
    let extractor = Arc::new(
        EmbeddingExtractor::new(&config.embedding, base_path.clone())
            .context("failed to build http client")?,
    );

    match args.command {
        Command::Embed { image } => {
            let embedding = match image_source(image)? {
                ImageSource::Bytes(data) => extractor.extract_from_bytes(&data)?,
                ImageSource::Url(url) => extractor.extract_from_url(&url)?,
            };
            println!("{}", serde_json::to_string(&embedding)?);
            Ok(())
        }

        Command::List { category } => {
            let service = build_service(&config, extractor)?;
            let items = match category {
                Some(category) => service.list_by_category(&category)?,
                None => service.list_all()?,
            };
            println!("{}", serde_json::to_string_pretty(&items)?);
            Ok(())
        }

        Command::Search {
            image,
            category,
            min_similarity,
            limit,
        } => {
            let service = build_service(&config, extractor)?;
            let request = SearchRequest {
                source: image_source(image)?,
                category,
                min_similarity,
                limit,
            };
            let response = service.search(request)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }

        Command::Serve { listen } => {
            let service = build_service(&config, extractor)?;
            let listen = listen.unwrap_or_else(|| config.server.listen.clone());
            web::start_daemon(Arc::new(service), &listen, config.embedding.max_image_bytes)
        }
    }
}

/// Wire the catalog, query log and extractor into a search service.
fn build_service(
    config: &Config,
    extractor: Arc<EmbeddingExtractor>,
) -> anyhow::Result<SearchService> {
    let catalog = MemoryCatalog::new();
    let items = seed::load_seed_file(&config.resolve(&config.catalog.seed_file))?;
    seed::seed_catalog(&catalog, &extractor, items, config.base_path());

    let query_log: Arc<dyn QueryLog> = if config.audit.persist {
        Arc::new(FileQueryLog::open(&config.resolve(&config.audit.file))?)
    } else {
        Arc::new(MemoryQueryLog::new())
    };

    let catalog: Arc<dyn CatalogStore> = Arc::new(catalog);
    log::info!(
        "catalog ready: {} items, {}-dimensional embeddings",
        catalog.len()?,
        extractor.dimensions()
    );

    Ok(SearchService::new(
        extractor,
        catalog,
        query_log,
        config.search.clone(),
        &config.embedding,
    ))
}

fn image_source(args: ImageArgs) -> anyhow::Result<ImageSource> {
    match (args.image, args.url) {
        (Some(path), _) => {
            let data = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(ImageSource::Bytes(data))
        }
        (None, Some(url)) => Ok(ImageSource::Url(url)),
        (None, None) => Err(anyhow!("either --image or --url is required")),
    }
}

/// Get the base path for the application
fn get_base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("VISEARCH_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .map_err(|e| anyhow!("Could not determine home directory: {e:?}"))?
        .ok_or_else(|| anyhow!("Home directory path is empty"))?;

    Ok(home.join(".local/share/visearch"))
}
