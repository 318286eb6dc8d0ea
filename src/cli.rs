use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::query::DEFAULT_NUM_RESULTS;

#[derive(Parser, Debug)]
#[command(author, version, about = "Text-to-image retrieval over a CLIP vector store", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Directory holding the vector store
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Collection name inside the store
    #[arg(long, global = true)]
    pub collection: Option<String>,

    /// Image directory or CSV manifest with an `image` column
    #[arg(long, global = true)]
    pub dataset: Option<PathBuf>,
}

impl GlobalArgs {
    /// CLI flags win over the environment.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(store) = &self.store {
            config.store_path = store.clone();
        }
        if let Some(collection) = &self.collection {
            config.collection = collection.clone();
        }
        if let Some(dataset) = &self.dataset {
            config.dataset = dataset.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Embed every dataset image and upsert it into the collection
    Ingest {
        /// Log progress and flush the store every N records
        #[arg(long)]
        checkpoint_every: Option<usize>,
    },
    /// Run one text query
    Query {
        /// Free-text query
        #[arg(required = true)]
        text: Vec<String>,

        /// Number of results
        #[arg(short, default_value_t = DEFAULT_NUM_RESULTS)]
        k: usize,

        /// Write a thumbnail per result into this directory
        #[arg(long)]
        preview_dir: Option<PathBuf>,

        /// Do not resolve results back to dataset images
        #[arg(long)]
        no_images: bool,
    },
    /// Run the built-in example queries
    Demo {
        /// Number of results per query
        #[arg(short, default_value_t = DEFAULT_NUM_RESULTS)]
        k: usize,

        /// Write a thumbnail per result into this directory
        #[arg(long)]
        preview_dir: Option<PathBuf>,

        /// Never wait for Enter between queries
        #[arg(long)]
        no_pause: bool,
    },
    /// Print dataset size and a few sample records
    Inspect {
        #[arg(long, default_value_t = 5)]
        samples: usize,
    },
    /// Export the dataset image behind a stored identifier
    Show {
        /// Identifier such as `image_12`
        id: String,

        /// Output image file
        #[arg(long)]
        out: PathBuf,
    },
    /// List collections in the store
    Collections,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
