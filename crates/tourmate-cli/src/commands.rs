//! Command parsing and execution.

use std::io::{self, Write};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use tracing::warn;

use tourmate_core::cache::{DataSource, FetchOutcome};
use tourmate_core::geo::distance_km;
use tourmate_core::ledger::VisitEntry;
use tourmate_core::models::{
    CatalogItem, Collection, Coordinates, EntityType, ProfileUpdate, Verification, VisitInput,
};
use tourmate_core::session::AuthError;
use tourmate_core::utils::truncate;

use crate::app::App;

const DEFAULT_FEATURED_LIMIT: usize = 5;
const DEFAULT_POPULAR_LIMIT: usize = 10;

/// Column width for names in listings.
const NAME_WIDTH: usize = 32;

/// Profile fields accepted by `profile field=value`.
const PROFILE_FIELDS: &[&str] = &[
    "name",
    "full_name",
    "email",
    "avatar",
    "phone",
    "location",
    "country",
    "zip_code",
    "birth_date",
    "gender",
];

pub const USAGE: &str = "\
Usage: tourmate <command>

Content:
  destinations [--refresh]        List destinations
  delicacies [--refresh]          List delicacies
  featured [N]                    Featured destinations
  popular [N]                     Popular destinations
  watch <destinations|delicacies> Print live changes until interrupted

Visits:
  visit <destination|delicacy> <id> [--rating N] [--notes TEXT] [--at LAT,LON]
  visits [destination|delicacy]   List recorded visits
  unvisit <visit-id>              Delete a visit
  sync                            Upload visits recorded offline

Identity:
  signup <email>                  Create a local account
  login <email>                   Sign in to a local account
  logout                          Sign out
  whoami                          Show the current identity
  profile <field=value>...        Edit the current profile
  remote-login <email> [--remember]  Sign in to the backend
  remote-logout                   Sign out of the backend and forget the password";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Destinations { refresh: bool },
    Delicacies { refresh: bool },
    Featured { limit: usize },
    Popular { limit: usize },
    Visit {
        entity_type: EntityType,
        entity_id: String,
        rating: Option<u8>,
        notes: Option<String>,
        at: Option<Coordinates>,
    },
    Visits { filter: Option<EntityType> },
    Unvisit { id: String },
    Sync,
    Signup { email: String },
    Login { email: String },
    Logout,
    Whoami,
    Profile { update: ProfileUpdate },
    RemoteLogin { email: String, remember: bool },
    RemoteLogout,
    Watch { collection: Collection },
    Help,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse the arguments after the program name.
pub fn parse(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };

    let command = match name.as_str() {
        "destinations" => Command::Destinations {
            refresh: has_flag(rest, "--refresh"),
        },
        "delicacies" => Command::Delicacies {
            refresh: has_flag(rest, "--refresh"),
        },
        "featured" => Command::Featured {
            limit: parse_limit(rest, DEFAULT_FEATURED_LIMIT)?,
        },
        "popular" => Command::Popular {
            limit: parse_limit(rest, DEFAULT_POPULAR_LIMIT)?,
        },
        "visit" => parse_visit(rest)?,
        "visits" => Command::Visits {
            filter: rest.first().map(|t| parse_entity_type(t)).transpose()?,
        },
        "unvisit" => Command::Unvisit {
            id: required(rest, 0, "visit id")?,
        },
        "sync" => Command::Sync,
        "signup" => Command::Signup {
            email: required(rest, 0, "email")?,
        },
        "login" => Command::Login {
            email: required(rest, 0, "email")?,
        },
        "logout" => Command::Logout,
        "whoami" => Command::Whoami,
        "profile" => Command::Profile {
            update: parse_profile(rest)?,
        },
        "remote-login" => Command::RemoteLogin {
            email: required(rest, 0, "email")?,
            remember: has_flag(rest, "--remember"),
        },
        "remote-logout" => Command::RemoteLogout,
        "watch" => Command::Watch {
            collection: parse_collection(&required(rest, 0, "collection")?)?,
        },
        "help" | "--help" | "-h" => Command::Help,
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    };
    Ok(command)
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn required(args: &[String], index: usize, what: &str) -> Result<String> {
    args.get(index)
        .filter(|a| !a.starts_with("--"))
        .cloned()
        .ok_or_else(|| anyhow!("Missing {}", what))
}

/// Value following `flag`, if the flag is present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|v| Some(v.as_str()))
            .ok_or_else(|| anyhow!("{} needs a value", flag)),
        None => Ok(None),
    }
}

fn parse_limit(args: &[String], default: usize) -> Result<usize> {
    match args.first() {
        Some(n) => n.parse().with_context(|| format!("Invalid count: {}", n)),
        None => Ok(default),
    }
}

fn parse_entity_type(value: &str) -> Result<EntityType> {
    value.parse().map_err(|e: String| anyhow!(e))
}

fn parse_collection(value: &str) -> Result<Collection> {
    match parse_entity_type(value)? {
        EntityType::Destination => Ok(Collection::Destinations),
        EntityType::Delicacy => Ok(Collection::Delicacies),
    }
}

fn parse_coordinates(value: &str) -> Result<Coordinates> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| anyhow!("Expected LAT,LON but got {}", value))?;
    Ok(Coordinates {
        latitude: lat.trim().parse().context("Invalid latitude")?,
        longitude: lon.trim().parse().context("Invalid longitude")?,
    })
}

fn parse_visit(args: &[String]) -> Result<Command> {
    let entity_type = parse_entity_type(&required(args, 0, "entity type")?)?;
    let entity_id = required(args, 1, "entity id")?;
    let rating = flag_value(args, "--rating")?
        .map(|r| r.parse::<u8>().with_context(|| format!("Invalid rating: {}", r)))
        .transpose()?;
    let notes = flag_value(args, "--notes")?.map(str::to_string);
    let at = flag_value(args, "--at")?.map(parse_coordinates).transpose()?;
    Ok(Command::Visit {
        entity_type,
        entity_id,
        rating,
        notes,
        at,
    })
}

fn parse_profile(args: &[String]) -> Result<ProfileUpdate> {
    if args.is_empty() {
        bail!("Nothing to update. Use field=value, fields: {}", PROFILE_FIELDS.join(", "));
    }
    let mut fields = Map::new();
    for arg in args {
        let (field, value) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected field=value but got {}", arg))?;
        if !PROFILE_FIELDS.contains(&field) {
            bail!("Unknown profile field: {} (fields: {})", field, PROFILE_FIELDS.join(", "));
        }
        fields.insert(field.to_string(), Value::String(value.to_string()));
    }
    serde_json::from_value(Value::Object(fields)).context("Invalid profile update")
}

// ============================================================================
// Execution
// ============================================================================

pub async fn run(app: &mut App, command: Command) -> Result<()> {
    match command {
        Command::Destinations { refresh } => {
            let outcome = app.core.caches().destinations().get(!refresh).await;
            report_source(&outcome);
            print_items(&outcome.items);
        }
        Command::Delicacies { refresh } => {
            let outcome = app.core.caches().delicacies().get(!refresh).await;
            report_source(&outcome);
            print_items(&outcome.items);
        }
        Command::Featured { limit } => {
            print_items(&app.core.caches().destinations().featured(limit).await);
        }
        Command::Popular { limit } => {
            print_items(&app.core.caches().destinations().popular(limit).await);
        }
        Command::Visit {
            entity_type,
            entity_id,
            rating,
            notes,
            at,
        } => {
            let verification = match at {
                Some(here) => Verification::from_distance_km(
                    entity_coordinates(app, entity_type, &entity_id)
                        .await
                        .map(|there| distance_km(here, there)),
                ),
                None => Verification::manual(),
            };
            let input = VisitInput {
                verification,
                notes,
                rating,
                ..Default::default()
            };
            let record = app
                .core
                .ledger()
                .mark_visited(&entity_id, entity_type, input)
                .await?;
            println!(
                "Recorded visit {} ({})",
                record.id,
                if record.verified { "verified" } else { "unverified" }
            );
        }
        Command::Visits { filter } => {
            let entries = app.core.ledger().list_visited(filter).await?;
            if entries.is_empty() {
                println!("No visits recorded");
            }
            for entry in &entries {
                print_visit(entry);
            }
        }
        Command::Unvisit { id } => {
            app.core.ledger().delete_visit(&id).await?;
            println!("Deleted visit {}", id);
        }
        Command::Sync => {
            let report = app.core.ledger().reconcile_local().await?;
            app.core.reconciler().flush().await?;
            println!("Uploaded {}, kept {} local", report.uploaded, report.kept);
            for failure in app.core.reconciler().failures() {
                println!(
                    "Failed {} to {}: {}",
                    failure.job.operation(),
                    failure.job.collection(),
                    failure.last_error
                );
            }
        }
        Command::Signup { email } => {
            let password = prompt_password("Password: ")?;
            let user = app
                .core
                .identity()
                .create_account(&email, &password)
                .await
                .map_err(auth_failure)?;
            println!("Created account {} ({})", user.email, user.uid);
        }
        Command::Login { email } => {
            let password = prompt_password("Password: ")?;
            let user = app
                .core
                .identity()
                .login(&email, &password)
                .await
                .map_err(auth_failure)?;
            println!("Signed in as {}", user.display());
        }
        Command::Logout => {
            app.core.identity().sign_out().await?;
            println!("Signed out");
        }
        Command::Whoami => {
            match app.core.identity().current_user() {
                Some(user) => println!("{} <{}> ({})", user.display(), user.email, user.uid),
                None => println!("Not signed in"),
            }
            match &app.session.data {
                Some(data) if app.session.is_valid() => println!(
                    "Backend: {} (expires in {} min)",
                    data.email.as_deref().unwrap_or(&data.user_id),
                    data.minutes_until_expiry()
                ),
                _ if app.backend.is_some() => println!("Backend: not signed in"),
                _ => println!("Backend: offline"),
            }
        }
        Command::Profile { update } => {
            let user = app
                .core
                .identity()
                .update_profile(&update)
                .await
                .map_err(auth_failure)?;
            app.core.reconciler().flush().await?;
            println!("Updated profile for {}", user.display());
        }
        Command::RemoteLogin { email, remember } => remote_login(app, &email, remember).await?,
        Command::RemoteLogout => remote_logout(app).await?,
        Command::Watch { collection } => watch(app, collection).await?,
        Command::Help => println!("{}", USAGE),
    }
    Ok(())
}

fn auth_failure(e: AuthError) -> anyhow::Error {
    match e {
        AuthError::Store(_) | AuthError::PasswordHash(_) => anyhow::Error::new(e),
        other => anyhow!("{} ({})", other.user_message(), other.code()),
    }
}

fn prompt_password(prompt: &str) -> Result<String> {
    let password = rpassword::prompt_password(prompt)?;
    Ok(password)
}

async fn entity_coordinates(app: &App, entity_type: EntityType, id: &str) -> Option<Coordinates> {
    match entity_type {
        EntityType::Destination => app
            .core
            .caches()
            .destinations()
            .by_id(id)
            .await
            .and_then(|d| d.coordinates()),
        EntityType::Delicacy => app
            .core
            .caches()
            .delicacies()
            .by_id(id)
            .await
            .and_then(|d| d.coordinates()),
    }
}

async fn remote_login(app: &mut App, email: &str, remember: bool) -> Result<()> {
    let backend = app.backend.as_ref().ok_or_else(|| {
        anyhow!("No backend configured. Set TOURMATE_SUPABASE_URL and TOURMATE_SUPABASE_ANON_KEY.")
    })?;

    let stored = if remember {
        None
    } else {
        backend.credentials.password(email).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read remembered credentials");
            None
        })
    };
    let password = match stored {
        Some(p) => p,
        None => prompt_password("Backend password: ")?,
    };

    let data = backend
        .client
        .sign_in_with_password(email, &password)
        .await
        .context("Backend sign-in failed")?;

    if remember {
        if let Err(e) = backend.credentials.remember(email, &password) {
            warn!(error = %e, "Failed to store credentials");
        }
    }

    app.config.last_email = Some(email.to_string());
    if let Err(e) = app.config.save() {
        warn!(error = %e, "Failed to save config");
    }

    app.session.update(data);
    app.session.save().await?;
    println!("Signed in to backend as {}", email);
    Ok(())
}

async fn remote_logout(app: &mut App) -> Result<()> {
    if let Some(backend) = &app.backend {
        backend.client.sign_out();
        if let Some(email) = app.config.last_email.as_deref() {
            backend.credentials.forget(email)?;
        }
    }
    app.session.clear().await?;
    println!("Signed out of backend");
    Ok(())
}

async fn watch(app: &App, collection: Collection) -> Result<()> {
    let hub = app.core.caches().hub();
    let (_token, mut rx) = hub.subscribe_channel(collection).await?;
    eprintln!("Watching {} (Ctrl-C to stop)", collection);
    io::stderr().flush()?;

    while let Some(event) = rx.recv().await {
        println!(
            "{} {} {}",
            chrono::Local::now().format("%H:%M:%S"),
            event.kind,
            event.affected_id
        );
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn report_source<T>(outcome: &FetchOutcome<T>) {
    if outcome.source == DataSource::Fallback {
        let reason = outcome
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default();
        eprintln!("Backend unavailable, showing cached data: {}", reason);
    }
}

fn print_items<T: CatalogItem>(items: &[T]) {
    if items.is_empty() {
        println!("Nothing to show");
        return;
    }
    for item in items {
        println!(
            "{:>6}  {:<width$}  {:>4.1}  {:>4}{}",
            item.id(),
            truncate(item.name(), NAME_WIDTH),
            item.rating(),
            item.review_count(),
            if item.is_featured() { "  *" } else { "" },
            width = NAME_WIDTH
        );
    }
}

fn print_visit(entry: &VisitEntry) {
    let record = &entry.record;
    let subject = entry
        .entity
        .as_ref()
        .and_then(|e| e.name.clone())
        .unwrap_or_else(|| format!("{} {}", record.entity_type, record.entity_id));
    println!(
        "{}  {}  {:<width$}  {}{}",
        record.visited_at.format("%Y-%m-%d"),
        record.id,
        truncate(&subject, NAME_WIDTH),
        if record.verified { "verified" } else { "manual" },
        record
            .rating
            .map(|r| format!("  {}/5", r))
            .unwrap_or_default(),
        width = NAME_WIDTH
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_listing_commands() {
        assert_eq!(parse(&[]).expect("empty"), Command::Help);
        assert_eq!(
            parse(&args("destinations --refresh")).expect("parse"),
            Command::Destinations { refresh: true }
        );
        assert_eq!(
            parse(&args("featured")).expect("parse"),
            Command::Featured {
                limit: DEFAULT_FEATURED_LIMIT
            }
        );
        assert_eq!(
            parse(&args("popular 3")).expect("parse"),
            Command::Popular { limit: 3 }
        );
        assert!(parse(&args("popular lots")).is_err());
    }

    #[test]
    fn test_parse_visit() {
        let command = parse(&args("visit destination 12 --rating 5 --at 10.29,123.90")).expect("parse");
        assert_eq!(
            command,
            Command::Visit {
                entity_type: EntityType::Destination,
                entity_id: "12".to_string(),
                rating: Some(5),
                notes: None,
                at: Some(Coordinates {
                    latitude: 10.29,
                    longitude: 123.90
                }),
            }
        );
        assert!(parse(&args("visit place 12")).is_err());
        assert!(parse(&args("visit delicacy")).is_err());
        assert!(parse(&args("visit delicacy 3 --rating")).is_err());
    }

    #[test]
    fn test_parse_profile() {
        let command = parse(&args("profile full_name=Ana birth_date=1990-01-01")).expect("parse");
        let Command::Profile { update } = command else {
            panic!("expected profile command");
        };
        assert_eq!(update.full_name.as_deref(), Some("Ana"));
        assert_eq!(update.birth_date.as_deref(), Some("1990-01-01"));

        assert!(parse(&args("profile password=x")).is_err());
        assert!(parse(&args("profile name")).is_err());
        assert!(parse(&args("profile")).is_err());
    }

    #[test]
    fn test_parse_watch_and_filters() {
        assert_eq!(
            parse(&args("watch delicacies")).expect("parse"),
            Command::Watch {
                collection: Collection::Delicacies
            }
        );
        assert_eq!(
            parse(&args("visits delicacy")).expect("parse"),
            Command::Visits {
                filter: Some(EntityType::Delicacy)
            }
        );
        assert!(parse(&args("bogus")).is_err());
    }
}
