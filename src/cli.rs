use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Visual similarity search over a product catalog", long_about = None)]
pub struct Args {
    /// Data directory holding config.yaml, the seed catalog and model cache.
    ///
    /// *Defaults to $VISEARCH_BASE_PATH or ~/.local/share/visearch*
    #[clap(long, global = true)]
    pub base_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Exactly one image source.
#[derive(ClapArgs, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct ImageArgs {
    /// Path to a local image file
    #[clap(short, long)]
    pub image: Option<PathBuf>,

    /// http(s) URL of an image
    #[clap(short, long)]
    pub url: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP daemon
    Serve {
        /// Override server.listen from the config
        #[clap(long)]
        listen: Option<String>,
    },

    /// Find catalog items similar to an image
    Search {
        #[command(flatten)]
        image: ImageArgs,

        /// Only search within this category (case-insensitive)
        #[clap(short, long)]
        category: Option<String>,

        /// Minimum similarity [0.0, 1.0]
        #[clap(short, long)]
        min_similarity: Option<f32>,

        /// Maximum number of results, clamped to [1, 50]
        #[clap(short, long, allow_negative_numbers = true)]
        limit: Option<i64>,
    },

    /// List catalog items
    List {
        /// Only list this category (case-insensitive)
        #[clap(short, long)]
        category: Option<String>,
    },

    /// Print the embedding of an image, e.g. for a seed file
    Embed {
        #[command(flatten)]
        image: ImageArgs,
    },
}
