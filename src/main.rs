use anyhow::{Context, bail};
use clap::{ArgGroup, Args, Parser, Subcommand};
use nusprofs::api::auth::{self, Registration};
use nusprofs::api::errors::ApiError;
use nusprofs::api::professors;
use nusprofs::api::reviews::ReviewEdit;
use nusprofs::app::App;
use nusprofs::app::editor;
use nusprofs::app::mutations::{MutationError, ReviewDraft};
use nusprofs::config;
use nusprofs::domain::{ProfessorId, Rating, ReplyId, ReviewId};
use nusprofs::render::thread;
use std::io::{self, BufRead, Write};
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "NUSPROFS_LOG";

/// Command-line client for NUSProfs professor reviews.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and store the session tokens.
    Login {
        username: String,
        /// Password; read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Revoke the session and forget stored tokens.
    Logout,
    /// Show the signed-in account.
    Whoami,
    /// Create an account.
    Register {
        username: String,
        email: String,
        /// Password; read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Search professors by name.
    Search {
        query: Vec<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Highest-rated professors.
    Top {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// List faculties and their departments.
    Faculties,
    /// List known modules.
    Modules,
    /// Compare professors teaching a module, per semester.
    Compare { module_code: String },
    /// Show a professor with their reviews.
    Professor {
        id: ProfessorId,
        /// Number of review pages to load.
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Expand every review's replies.
        #[arg(long)]
        replies: bool,
    },
    /// Show the replies to a review.
    Replies {
        review_id: ReviewId,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Reviews written by a user, or by you when no username is given.
    UserReviews {
        username: Option<String>,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Create, edit, delete, or like a review.
    #[command(subcommand)]
    Review(ReviewCommand),
    /// Create, edit, delete, or like a reply.
    #[command(subcommand)]
    Reply(ReplyCommand),
    /// Change account details.
    #[command(subcommand)]
    Account(AccountCommand),
    /// Inspect or edit nusprofs configuration.
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ReviewCommand {
    Create {
        prof_id: ProfessorId,
        #[arg(long)]
        module: String,
        /// 1 to 5 in half steps.
        #[arg(long)]
        rating: f64,
        /// Review text; opens an editor when omitted.
        #[arg(long)]
        text: Option<String>,
    },
    Edit {
        review_id: ReviewId,
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        rating: Option<f64>,
        #[arg(long)]
        text: Option<String>,
    },
    Delete { review_id: ReviewId },
    /// Toggle your like.
    Like { review_id: ReviewId },
}

#[derive(Debug, Subcommand)]
enum ReplyCommand {
    Create {
        review_id: ReviewId,
        /// Address the reply to this user with an @mention.
        #[arg(long)]
        to: Option<String>,
        /// Reply text; opens an editor when omitted.
        #[arg(long)]
        text: Option<String>,
    },
    Edit {
        reply_id: ReplyId,
        #[arg(long)]
        text: Option<String>,
    },
    Delete { reply_id: ReplyId },
    /// Toggle your like.
    Like { reply_id: ReplyId },
}

#[derive(Debug, Subcommand)]
enum AccountCommand {
    Username { new_username: String },
    Password,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("config_action")
        .required(true)
        .multiple(false)
        .args(["edit", "path"])
))]
struct ConfigCommand {
    /// Open the config file in $VISUAL/$EDITOR/nvim/vim/vi.
    #[arg(long)]
    edit: bool,

    /// Print the config file path.
    #[arg(long)]
    path: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Config(command) => handle_config_command(command),
        command => {
            let config = config::load_or_create()?;
            let app = App::connect(&config)?;
            run(&app, command).await.map_err(explain)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(app: &App, command: Command) -> anyhow::Result<()> {
    let client = app.client();
    let now = SystemTime::now();

    match command {
        Command::Login { username, password } => {
            let password = password_or_prompt(password, "Password")?;
            auth::login(client, &username, &password).await?;
            println!("Logged in as {username}.");
        }
        Command::Logout => {
            auth::logout(client).await;
            println!("Logged out.");
        }
        Command::Whoami => match app.sync().identify().await? {
            Some(user) => match user.email {
                Some(email) => println!("{} <{email}>", user.username),
                None => println!("{}", user.username),
            },
            None => println!("Not logged in."),
        },
        Command::Register {
            username,
            email,
            password,
        } => {
            let password = password_or_prompt(password, "Password")?;
            let confirm_password = prompt_line("Confirm password")?;
            auth::register(
                client,
                &Registration {
                    username,
                    email,
                    password,
                    confirm_password,
                },
            )
            .await?;
            println!("Account created. Log in to continue.");
        }
        Command::Search { query, page } => {
            let page = professors::search_professors(client, &query.join(" "), page).await?;
            print_listings(&page.items, page.has_next);
        }
        Command::Top { page } => {
            let page = professors::top_professors(client, page).await?;
            print_listings(&page.items, page.has_next);
        }
        Command::Faculties => {
            for faculty in professors::faculties(client).await? {
                println!("{}", faculty.name);
                for department in faculty.departments {
                    println!("  {}", department.name);
                }
            }
        }
        Command::Modules => {
            for module in professors::modules(client).await? {
                println!("{:<10} {}", module.module_code, module.name);
            }
        }
        Command::Compare { module_code } => {
            let comparison = professors::compare_module(client, &module_code).await?;
            println!("{}", thread::comparison_lines(&comparison).join("\n"));
        }
        Command::Professor { id, pages, replies } => {
            show_professor(app, id, pages, replies, now).await?;
        }
        Command::Replies { review_id, pages } => {
            let sync = app.sync();
            sync.load_replies(review_id).await?;
            for _ in 1..pages {
                if !sync.load_more_replies(review_id).await? {
                    break;
                }
            }
            println!("{}", sync.read(|cache| thread::replies_text(cache, review_id, now)));
        }
        Command::UserReviews { username, pages } => {
            let sync = app.sync();
            let username = username.as_deref();
            sync.identify().await?;
            sync.load_user_reviews(username).await?;
            for _ in 1..pages {
                if !sync.load_more_user_reviews(username).await? {
                    break;
                }
            }
            let text = sync.read(|cache| {
                let reviews = cache
                    .user_reviews(username)
                    .map(|list| list.items().to_vec())
                    .unwrap_or_default();
                thread::threads_text(cache, &reviews, now)
            });
            println!("{}", if text.is_empty() { "No reviews." } else { text.as_str() });
        }
        Command::Review(command) => run_review_command(app, command, now).await?,
        Command::Reply(command) => run_reply_command(app, command).await?,
        Command::Account(AccountCommand::Username { new_username }) => {
            auth::change_username(client, &new_username).await?;
            println!("Username changed to {new_username}.");
        }
        Command::Account(AccountCommand::Password) => {
            let old_password = prompt_line("Current password")?;
            let new_password = prompt_line("New password")?;
            let confirm_password = prompt_line("Confirm new password")?;
            auth::change_password(client, &old_password, &new_password, &confirm_password).await?;
            println!("Password changed.");
        }
        Command::Config(command) => handle_config_command(command)?,
    }

    Ok(())
}

async fn show_professor(
    app: &App,
    id: ProfessorId,
    pages: u32,
    expand_replies: bool,
    now: SystemTime,
) -> anyhow::Result<()> {
    let sync = app.sync();
    if let Err(error) = sync.identify().await {
        tracing::warn!(%error, "continuing without viewer identity");
    }
    let profile = sync.load_professor(id).await?;
    sync.load_reviews(id).await?;
    for _ in 1..pages {
        if !sync.load_more_reviews(id).await? {
            break;
        }
    }

    let reviews = sync.read(|cache| {
        cache
            .professor_reviews(id)
            .map(|list| list.items().to_vec())
            .unwrap_or_default()
    });
    if expand_replies {
        for review in reviews.iter().filter(|review| review.reply_count > 0) {
            sync.toggle_replies(review.id).await?;
        }
    }

    println!("{}", thread::professor_header(&profile).join("\n"));
    println!();
    let body = sync.read(|cache| thread::threads_text(cache, &reviews, now));
    println!("{}", if body.is_empty() { "No reviews yet." } else { body.as_str() });
    let more = sync.read(|cache| {
        cache
            .professor_reviews(id)
            .is_some_and(|list| list.cursor().has_next() == Some(true))
    });
    if more {
        println!("\n(more reviews available; pass --pages to load them)");
    }
    Ok(())
}

async fn run_review_command(app: &App, command: ReviewCommand, now: SystemTime) -> anyhow::Result<()> {
    let mutations = app.mutations();
    match command {
        ReviewCommand::Create {
            prof_id,
            module,
            rating,
            text,
        } => {
            let text = text_or_compose(text, "Write your review. Lines starting with # are ignored.")?;
            if let Err(error) = app.sync().load_professor(prof_id).await {
                tracing::warn!(%error, "module names unavailable");
            }
            let review = mutations
                .create_review(&ReviewDraft {
                    prof_id,
                    module_code: module,
                    text,
                    rating,
                })
                .await?;
            println!("{}", thread::review_block(&review, now).join("\n"));
        }
        ReviewCommand::Edit {
            review_id,
            module,
            rating,
            text,
        } => {
            let rating = match rating {
                Some(value) => Some(Rating::new(value).ok_or_else(|| {
                    ApiError::invalid("rating", "Rating must be between 1 and 5 in half steps.")
                })?),
                None => None,
            };
            let edit = ReviewEdit {
                module_code: module,
                text,
                rating,
            };
            if edit.is_empty() {
                bail!("nothing to change; pass --module, --rating, or --text");
            }
            mutations.edit_review(review_id, edit).await?;
            println!("Review {review_id} updated.");
        }
        ReviewCommand::Delete { review_id } => {
            mutations.delete_review(review_id).await?;
            println!("Review {review_id} deleted.");
        }
        ReviewCommand::Like { review_id } => {
            let like = mutations.like_review(review_id).await?;
            println!(
                "{} review {review_id} ({} likes).",
                if like.liked { "Liked" } else { "Unliked" },
                like.likes_count
            );
        }
    }
    Ok(())
}

async fn run_reply_command(app: &App, command: ReplyCommand) -> anyhow::Result<()> {
    let mutations = app.mutations();
    match command {
        ReplyCommand::Create {
            review_id,
            to,
            text,
        } => {
            let text = text_or_compose(text, "Write your reply. Lines starting with # are ignored.")?;
            mutations.create_reply(review_id, &text, to.as_deref()).await?;
            let count = app
                .sync()
                .read(|cache| cache.thread(review_id).map(|node| node.replies().items().len()));
            match count {
                Some(count) => println!("Reply posted; {count} replies loaded."),
                None => println!("Reply posted."),
            }
        }
        ReplyCommand::Edit { reply_id, text } => {
            let text = text_or_compose(text, "Edit your reply. Lines starting with # are ignored.")?;
            mutations.edit_reply(reply_id, &text).await?;
            println!("Reply {reply_id} updated.");
        }
        ReplyCommand::Delete { reply_id } => {
            mutations.delete_reply(reply_id).await?;
            println!("Reply {reply_id} deleted.");
        }
        ReplyCommand::Like { reply_id } => {
            let like = mutations.like_reply(reply_id).await?;
            println!(
                "{} reply {reply_id} ({} likes).",
                if like.liked { "Liked" } else { "Unliked" },
                like.likes_count
            );
        }
    }
    Ok(())
}

fn print_listings(listings: &[nusprofs::domain::ProfessorListing], has_next: bool) {
    if listings.is_empty() {
        println!("No professors found.");
        return;
    }
    for listing in listings {
        println!("{}", thread::listing_line(listing));
    }
    if has_next {
        println!("(more results; pass --page to see them)");
    }
}

fn text_or_compose(text: Option<String>, instructions: &str) -> anyhow::Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    match editor::compose_with_system_editor(instructions, "")? {
        Some(text) => Ok(text),
        None => bail!("aborted: nothing was written"),
    }
}

fn password_or_prompt(password: Option<String>, label: &str) -> anyhow::Result<String> {
    match password {
        Some(password) => Ok(password),
        None => prompt_line(label),
    }
}

fn prompt_line(label: &str) -> anyhow::Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

/// Rewrites API failures into messages a person can act on.
fn explain(error: anyhow::Error) -> anyhow::Error {
    let api_error = error
        .downcast_ref::<ApiError>()
        .or_else(|| match error.downcast_ref::<MutationError>() {
            Some(MutationError::Api(api_error)) => Some(api_error),
            _ => None,
        });
    let login_required = error.downcast_ref::<MutationError>().is_some_and(|error| {
        matches!(error, MutationError::LoginRequired)
    }) || api_error.is_some_and(ApiError::requires_login);

    if login_required {
        return anyhow::anyhow!("please log in first: nusprofs login <username>");
    }
    match api_error {
        Some(api_error) => anyhow::anyhow!(api_error.user_message()),
        None => error,
    }
}

fn handle_config_command(command: ConfigCommand) -> anyhow::Result<()> {
    let path = config::ensure_config_file()?;

    if command.path {
        println!("{}", path.display());
        return Ok(());
    }

    if command.edit {
        editor::edit_file_with_system_editor(path.as_path())?;
        return Ok(());
    }

    Ok(())
}
