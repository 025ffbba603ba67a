use serde::{Deserialize, Serialize};

use crate::request::Request;

/// Tagged payload yielded by a spider callback. `type` on the wire matches
/// the project's declared `crawl_type`; the item router discards mismatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    Article {
        source_url: String,
        title: String,
        content: String,
    },
    Keywords {
        keywords: Vec<String>,
    },
    Images {
        urls: Vec<String>,
    },
}

impl ItemKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ItemKind::Article { .. } => "article",
            ItemKind::Keywords { .. } => "keywords",
            ItemKind::Images { .. } => "images",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(flatten)]
    pub kind: ItemKind,
}

impl Item {
    pub fn article(
        source_url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: ItemKind::Article {
                source_url: source_url.into(),
                title: title.into(),
                content: content.into(),
            },
        }
    }

    pub fn keywords(keywords: Vec<String>) -> Self {
        Self {
            kind: ItemKind::Keywords { keywords },
        }
    }

    pub fn images(urls: Vec<String>) -> Self {
        Self {
            kind: ItemKind::Images { urls },
        }
    }
}

/// Emitted when a request exhausts its retries; the consumer forwards this
/// alongside ordinary items so the runner can route it to the failed-request
/// store without treating it as a successful crawl output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSentinel {
    pub request: Request,
    pub error: String,
}

/// What the consumer pushes onto the runner's output channel.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Item(Item),
    Failed(FailedSentinel),
}
