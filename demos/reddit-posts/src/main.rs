//! # Reddit Posts Example
//!
//! Requests the newest posts of a subreddit. The reducer decides whether a
//! fetch is needed and emits it as a [`Thunk`]; `perform_with` runs it after
//! the state change is committed, and the fetch dispatches the result back.
//!
//! ```text
//! cargo run -p reddit-posts-demo -- rust
//! RUST_LOG=petux_core=debug cargo run -p reddit-posts-demo
//! ```

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use petux_core::{
    perform_with, reducer_fn, slice, Dispatch, EffectStore, EffectsConfig, Emit, Reducer,
    ReducerExt, Thunk,
};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone)]
enum Action {
    SelectReddit(String),

    /// Fetch unless a fetch is running or the posts are still valid
    RequestPosts { reddit: String, force_fetch: bool },

    ReceivePosts {
        reddit: String,
        posts: Vec<Post>,
        received_at: DateTime<Utc>,
    },

    /// The fetch failed; the reducer decides what that means
    PostsFailed { reddit: String, reason: String },
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct Post {
    title: String,
    author: String,
    score: i64,
}

#[derive(Debug, Clone, Default)]
struct Posts {
    is_fetching: bool,
    valid: bool,
    items: Vec<Post>,
    last_updated: Option<DateTime<Utc>>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct AppState {
    selected_reddit: String,
    posts_by_reddit: HashMap<String, Posts>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            selected_reddit: "rust".to_string(),
            posts_by_reddit: HashMap::new(),
        }
    }
}

// ============================================================================
// Effects
// ============================================================================

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

async fn load_posts(client: &reqwest::Client, reddit: &str) -> Result<Vec<Post>> {
    let listing: Listing = client
        .get(format!("https://www.reddit.com/r/{reddit}.json"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(listing.data.children.into_iter().map(|c| c.data).collect())
}

/// Fetch a subreddit and dispatch what came back.
fn fetch_posts(client: reqwest::Client, reddit: String) -> Thunk<Action> {
    Thunk::new("fetch_posts", move |dispatch: &Dispatch<Action>| {
        let client = client.clone();
        let reddit = reddit.clone();
        let dispatch = dispatch.clone();
        dispatch.clone().spawn(async move {
            let action = match load_posts(&client, &reddit).await {
                Ok(posts) => Action::ReceivePosts {
                    reddit,
                    posts,
                    received_at: Utc::now(),
                },
                Err(err) => Action::PostsFailed {
                    reddit,
                    reason: format!("{err:#}"),
                },
            };
            dispatch.dispatch(action)?;
            Ok(())
        })?;
        Ok(())
    })
}

// ============================================================================
// Reducers
// ============================================================================

#[allow(clippy::ptr_arg)]
fn selected_reddit(
    state: &String,
    action: &Action,
    _emit: &Emit<Thunk<Action>>,
) -> Result<String> {
    Ok(match action {
        Action::SelectReddit(reddit) => reddit.clone(),
        _ => state.clone(),
    })
}

fn posts(
    client: &reqwest::Client,
    state: &Posts,
    action: &Action,
    emit: &Emit<Thunk<Action>>,
) -> Posts {
    match action {
        Action::RequestPosts {
            reddit,
            force_fetch,
        } => {
            let is_fetching = *force_fetch || (!state.valid && !state.is_fetching);
            if is_fetching {
                emit.emit(fetch_posts(client.clone(), reddit.clone()));
            }
            Posts {
                is_fetching: is_fetching || state.is_fetching,
                valid: true,
                ..state.clone()
            }
        }
        Action::ReceivePosts {
            posts, received_at, ..
        } => Posts {
            is_fetching: false,
            valid: true,
            items: posts.clone(),
            last_updated: Some(*received_at),
            error: None,
        },
        Action::PostsFailed { reason, .. } => Posts {
            is_fetching: false,
            valid: false,
            error: Some(reason.clone()),
            ..state.clone()
        },
        Action::SelectReddit(_) => state.clone(),
    }
}

fn posts_by_reddit(
    client: reqwest::Client,
) -> impl Reducer<HashMap<String, Posts>, Action, Thunk<Action>> {
    reducer_fn(
        move |state: &HashMap<String, Posts>, action: &Action, emit: &Emit<Thunk<Action>>| {
            let reddit = match action {
                Action::RequestPosts { reddit, .. }
                | Action::ReceivePosts { reddit, .. }
                | Action::PostsFailed { reddit, .. } => reddit,
                Action::SelectReddit(_) => return Ok(state.clone()),
            };
            let current = state.get(reddit).cloned().unwrap_or_default();
            let mut next = state.clone();
            next.insert(reddit.clone(), posts(&client, &current, action, emit));
            Ok(next)
        },
    )
}

/// Each part of the state gets its own reducer.
fn root_reducer(client: reqwest::Client) -> impl Reducer<AppState, Action, Thunk<Action>> {
    let selected = slice(
        |state: &AppState| &state.selected_reddit,
        |state: &AppState, selected_reddit| AppState {
            selected_reddit,
            ..state.clone()
        },
        reducer_fn(selected_reddit),
    );
    let posts = slice(
        |state: &AppState| &state.posts_by_reddit,
        |state: &AppState, posts_by_reddit| AppState {
            posts_by_reddit,
            ..state.clone()
        },
        posts_by_reddit(client),
    );
    selected.then(posts)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reddit_posts_demo=info".parse()?))
        .init();

    let reddit = std::env::args().nth(1).unwrap_or_else(|| "rust".to_string());

    let client = reqwest::Client::builder()
        .user_agent("petux-reddit-posts-demo/0.1")
        .timeout(Duration::from_secs(10))
        .build()?;

    let config = EffectsConfig::from_json_value(serde_json::json!({
        "name": "reddit",
        "discard_policy": "warn",
    }))?;

    let store = EffectStore::builder(AppState::default())
        .with_config(config)
        .with_reducer(root_reducer(client))
        .with_handler(perform_with())
        .build()?;

    store.subscribe(|state: &AppState| {
        if let Some(posts) = state.posts_by_reddit.get(&state.selected_reddit) {
            info!(
                reddit = %state.selected_reddit,
                fetching = posts.is_fetching,
                items = posts.items.len(),
                "state changed"
            );
        }
    });

    store.dispatch(Action::SelectReddit(reddit.clone()))?;
    store.dispatch(Action::RequestPosts {
        reddit: reddit.clone(),
        force_fetch: false,
    })?;
    // Already fetching: the reducer emits nothing this time.
    store.dispatch(Action::RequestPosts {
        reddit: reddit.clone(),
        force_fetch: false,
    })?;

    if tokio::time::timeout(Duration::from_secs(15), store.settled())
        .await
        .is_err()
    {
        warn!("gave up waiting for effects");
    }

    let state = store.state();
    match state.posts_by_reddit.get(&reddit) {
        Some(Posts {
            error: Some(reason),
            ..
        }) => println!("r/{reddit}: fetch failed: {reason}"),
        Some(posts) => {
            println!(
                "r/{reddit}: {} posts (updated {})",
                posts.items.len(),
                posts
                    .last_updated
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            for post in posts.items.iter().take(10) {
                println!("  [{:>5}] {} (u/{})", post.score, post.title, post.author);
            }
        }
        None => println!("r/{reddit}: nothing requested"),
    }

    Ok(())
}
