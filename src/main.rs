use std::{process, sync::Arc};

use devlog_sync::{
    application::{
        CommentActions, NotificationCenter, PostActions, SyncContext,
        error::{ActionError, AppError},
        repos::{CommentsRepo, IdentityProvider, MediaStore, NotificationsRepo, PostsRepo},
    },
    cache::{CacheConfig, CacheKey, FeedItem, KeySelector, ListFilter, MutationOutcome, QueryState},
    config::{self, Command, FeedArgs, NotificationsArgs},
    domain::drafts::NewComment,
    infra::{
        error::InfraError,
        http::{ApiClient, HttpBackend, SessionIdentity},
        telemetry,
    },
};
use serde::Serialize;
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
    } else {
        let subscriber = tracing_fmt()
            .with_max_level(Level::ERROR)
            .with_writer(std::io::stderr)
            .finish();
        let dispatch = Dispatch::new(subscriber);
        dispatcher::with_default(&dispatch, || {
            error!(error = %error, "application error");
        });
    }
    if let AppError::Action(err) = error {
        let _ = print_json(&json!({ "notice": err.notice() }));
    }
}

/// The action services wired to the HTTP collaborators.
struct Client {
    ctx: SyncContext,
    posts: PostActions,
    comments: CommentActions,
    notifications: Arc<NotificationCenter>,
}

impl Client {
    fn connect(settings: &config::Settings) -> Result<Self, AppError> {
        let api = Arc::new(ApiClient::new(&settings.api)?);
        let backend = Arc::new(HttpBackend::new(api.clone()));
        let identity: Arc<dyn IdentityProvider> = Arc::new(SessionIdentity::new(api));
        let ctx = SyncContext::new(&CacheConfig::from(&settings.cache), identity);

        let posts_repo: Arc<dyn PostsRepo> = backend.clone();
        let comments_repo: Arc<dyn CommentsRepo> = backend.clone();
        let notifications_repo: Arc<dyn NotificationsRepo> = backend.clone();
        let media: Arc<dyn MediaStore> = backend;

        Ok(Self {
            posts: PostActions::new(ctx.clone(), posts_repo, media.clone()),
            comments: CommentActions::new(ctx.clone(), comments_repo, media),
            notifications: Arc::new(NotificationCenter::new(ctx.clone(), notifications_repo)),
            ctx,
        })
    }
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    telemetry::init(&settings.logging)?;
    let client = Client::connect(&settings)?;

    match cli_args.command {
        Command::Feed(args) => run_feed(&client, args).await,
        Command::Saved => print_state(client.posts.load_saved().await),
        Command::Post(target) => print_state(client.posts.load_post(target.id).await),
        Command::Like(reaction) => {
            if reaction.comment {
                print_outcome(client.comments.toggle_like(reaction.id).await)
            } else {
                print_outcome(client.posts.toggle_like(reaction.id).await)
            }
        }
        Command::Helpful(reaction) => {
            if reaction.comment {
                print_outcome(client.comments.toggle_helpful(reaction.id).await)
            } else {
                print_outcome(client.posts.toggle_helpful(reaction.id).await)
            }
        }
        Command::Save(target) => print_outcome(client.posts.save(target.id).await),
        Command::Unsave(target) => print_outcome(client.posts.unsave(target.id).await),
        Command::Report(report) => {
            print_outcome(client.posts.report(report.id, &report.reason).await)
        }
        Command::Thread(target) => print_state(client.comments.load_thread(target.id).await),
        Command::Comment(args) => {
            let draft = NewComment {
                content: args.content,
                parent_id: args.parent,
                image_upload: None,
                image_url: None,
            };
            // Loading the thread first lets the reply target be checked locally.
            if draft.parent_id.is_some() {
                client.comments.load_thread(args.post_id).await;
            }
            print_outcome(client.comments.create(args.post_id, draft).await)
        }
        Command::Notifications(args) => run_notifications(&client, args).await,
    }
}

async fn run_feed(client: &Client, args: FeedArgs) -> Result<(), AppError> {
    let mut filter: ListFilter = client.posts.filter().await;
    for tag in &args.tags {
        filter = filter.tag(tag);
    }
    if let Some(search) = args.search.as_deref() {
        filter = filter.search(search);
    }
    if let Some(author) = args.author {
        filter = filter.author(author);
    }
    print_state(client.posts.load_list(&filter).await)
}

async fn run_notifications(client: &Client, args: NotificationsArgs) -> Result<(), AppError> {
    let state = client.notifications.refresh().await;
    if args.mark_all_read {
        client.notifications.mark_all_read().await.into_result()?;
        print_state(client.notifications.notifications().await)?;
    } else {
        print_state(state)?;
    }

    if !args.watch {
        return Ok(());
    }

    let viewer = client
        .ctx
        .viewer_id()
        .await
        .ok_or(AppError::Action(ActionError::NotAuthenticated))?;
    let mut changes = client
        .ctx
        .store
        .feed()
        .watch(KeySelector::Exact(CacheKey::Notifications { viewer }));
    let _polling = client
        .notifications
        .clone()
        .spawn_polling(client.ctx.config.notification_poll_interval());

    loop {
        tokio::select! {
            item = changes.next() => match item {
                Some(FeedItem::Changed(_) | FeedItem::Resync) => {
                    let unread = client.notifications.unread_count().await;
                    print_json(&json!({ "unread": unread }))?;
                }
                None => return Ok(()),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(InfraError::from)?;
                return Ok(());
            }
        }
    }
}

fn print_state<T: Serialize>(state: QueryState<T>) -> Result<(), AppError> {
    if let Some(err) = state.error() {
        return Err(AppError::Action(err.clone()));
    }
    print_json(&state)
}

fn print_outcome<T: Serialize>(outcome: MutationOutcome<T>) -> Result<(), AppError> {
    match outcome.into_result()? {
        Some(value) => print_json(&json!({ "status": "reconciled", "value": value })),
        None => print_json(&json!({ "status": "noop" })),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_reads_exit_with_their_error_kind() {
        let missing = print_state::<()>(QueryState::Failed {
            error: ActionError::NotFound,
        })
        .expect_err("failed state");
        assert_eq!(missing.exit_code(), 5);

        let offline = print_state::<()>(QueryState::Failed {
            error: ActionError::Transient("reset".to_string()),
        })
        .expect_err("failed state");
        assert_eq!(offline.exit_code(), 1);
    }
}
