use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use uuid::Uuid;

/// Command-line arguments for the devlog client.
#[derive(Debug, Parser)]
#[command(name = "devlog", version, about = "Headless developer-blog client")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "DEVLOG_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the API base URL.
    #[arg(long = "api-url", value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Session token sent as a bearer credential.
    #[arg(
        long = "session-token",
        env = "DEVLOG_SESSION_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        global = true
    )]
    pub session_token: Option<String>,

    /// Override the request timeout.
    #[arg(long = "api-timeout-seconds", value_name = "SECONDS", global = true)]
    pub api_timeout_seconds: Option<u64>,

    /// Override the maximum number of cached views.
    #[arg(long = "cache-max-entries", value_name = "COUNT", global = true)]
    pub cache_max_entries: Option<usize>,

    /// Override the notification polling interval.
    #[arg(long = "notification-poll-seconds", value_name = "SECONDS", global = true)]
    pub notification_poll_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Force JSON log output (true/false).
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Show a post feed.
    Feed(FeedArgs),
    /// Show the viewer's saved posts.
    Saved,
    /// Show one post.
    Post(TargetArgs),
    /// Toggle a like on a post or comment.
    Like(ReactionArgs),
    /// Toggle a helpful mark on a post or comment.
    Helpful(ReactionArgs),
    /// Save a post.
    Save(TargetArgs),
    /// Remove a post from the saved list.
    Unsave(TargetArgs),
    /// Report a post.
    Report(ReportArgs),
    /// Show the nested comment thread of a post.
    Thread(TargetArgs),
    /// Comment on a post or reply to a comment.
    Comment(CommentArgs),
    /// List notifications.
    Notifications(NotificationsArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct FeedArgs {
    /// Only posts carrying this tag; repeatable.
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Case-insensitive text search.
    #[arg(long, value_name = "TEXT")]
    pub search: Option<String>,

    /// Only posts by this author.
    #[arg(long, value_name = "UUID")]
    pub author: Option<Uuid>,
}

#[derive(Debug, Args, Clone)]
pub struct TargetArgs {
    #[arg(value_name = "ID")]
    pub id: Uuid,
}

#[derive(Debug, Args, Clone)]
pub struct ReactionArgs {
    #[arg(value_name = "ID")]
    pub id: Uuid,

    /// Target a comment instead of a post.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub comment: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ReportArgs {
    #[arg(value_name = "ID")]
    pub id: Uuid,

    #[arg(long, value_name = "TEXT")]
    pub reason: String,
}

#[derive(Debug, Args, Clone)]
pub struct CommentArgs {
    #[arg(value_name = "POST_ID")]
    pub post_id: Uuid,

    #[arg(long, value_name = "TEXT")]
    pub content: String,

    /// Reply to this comment.
    #[arg(long, value_name = "COMMENT_ID")]
    pub parent: Option<Uuid>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct NotificationsArgs {
    /// Keep polling and print the unread count on every change.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub watch: bool,

    /// Mark everything read before listing.
    #[arg(long = "mark-all-read", action = clap::ArgAction::SetTrue)]
    pub mark_all_read: bool,
}
