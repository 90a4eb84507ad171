//! Command execution.

use std::sync::Arc;

use anyhow::{Context, bail};
use folio_core::{ClientConfig, QueryCache, Session, Transport, cache_key};
use folio_session::{
    GuardDecision, QueryClient, QueryState, RouteGuard, SessionManager, storage::FileStore,
};
use folio_transport::{HttpClient, RegisterRequest};
use serde_json::Value;

use crate::cli::{Cli, Command};

type Storage = Arc<FileStore>;
type Manager = SessionManager<HttpClient, Storage>;

/// Restore the session, then run the requested command.
///
/// # Errors
/// Returns error on invalid configuration, an unreadable state file, or a
/// failed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ClientConfig::from_env().context("invalid environment configuration")?;
    if let Some(base) = cli.api_base {
        config = config.with_api_base(base);
    }

    let state_file = match cli.state_file {
        Some(path) => path,
        None => FileStore::default_path()
            .context("no local data directory, pass --state-file")?,
    };
    let storage = Arc::new(
        FileStore::open(&state_file)
            .await
            .with_context(|| format!("failed to open state file {}", state_file.display()))?,
    );

    let http = HttpClient::from_config(&config)?;
    let manager = SessionManager::new(http, Arc::clone(&storage), &config);
    let restored = manager.restore().await;
    tracing::debug!(state = %restored.state, api_base = %config.api_base, "session restored");

    match cli.command {
        Command::Login { email, password } => {
            let session = manager.login(&email, &password).await?;
            print_signed_in(&session);
        }
        Command::Register {
            email,
            password,
            full_name,
        } => {
            let mut request = RegisterRequest::new(email, password);
            request.full_name = full_name;
            let session = manager.register(request).await?;
            print_signed_in(&session);
        }
        Command::Social {
            provider,
            credential,
        } => {
            let session = manager
                .login_with_provider(provider.into(), &credential)
                .await?;
            print_signed_in(&session);
        }
        Command::FarLogin { customer_id } => {
            let far = manager.far_customer_login(&customer_id).await?;
            println!("Signed in as FAR customer {}.", far.customer_id);
        }
        Command::FarLogout => {
            manager.far_customer_logout().await;
            println!("Left FAR customer mode.");
        }
        Command::Logout => {
            manager.logout().await;
            println!("Signed out.");
        }
        Command::Whoami => {
            match manager.session().user {
                Some(user) if manager.is_authenticated() => {
                    println!("{}", serde_json::to_string_pretty(&user)?);
                }
                _ => println!("Not signed in."),
            }
            if let Some(far) = manager.far_customer_session() {
                println!("FAR customer {}.", far.customer_id);
            }
        }
        Command::Query {
            path,
            body,
            far_customer,
        } => {
            let payload: Value = serde_json::from_str(&body).context("--body is not valid JSON")?;
            if far_customer {
                far_customer_query(&manager, &storage, &config, &path, payload).await?;
            } else {
                query(&manager, &storage, &config, &path, payload).await?;
            }
        }
        Command::Guard {
            location,
            login_path,
        } => {
            let guard = RouteGuard::new(login_path);
            let mut session = manager.subscribe();
            match guard.resolve(&mut session, &location).await {
                GuardDecision::Allow => println!("allow {location}"),
                GuardDecision::Redirect { to, from } => println!("redirect {to} (from {from})"),
                GuardDecision::Loading => println!("loading"),
            }
        }
    }

    Ok(())
}

async fn load_cache(
    storage: &Storage,
    config: &ClientConfig,
    path: &str,
    payload: &Value,
) -> anyhow::Result<QueryCache<Storage>> {
    let cache = QueryCache::load(Arc::clone(storage), config.cache_capacity, config.cache_ttl)
        .await
        .context("failed to load query cache")?;

    if let Some(entry) = cache.get(&cache_key(path, payload)).await {
        println!("cached ({}):", entry.timestamp);
        println!("{}", serde_json::to_string_pretty(&entry.data)?);
    }
    Ok(cache)
}

async fn query(
    manager: &Manager,
    storage: &Storage,
    config: &ClientConfig,
    path: &str,
    payload: Value,
) -> anyhow::Result<()> {
    let cache = load_cache(storage, config, path, &payload).await?;

    let authenticated = manager.is_authenticated();
    let state = if authenticated {
        fetch(manager.authenticated_transport(), cache, path, payload).await
    } else {
        fetch(manager.transport().clone(), cache, path, payload).await
    };

    match state.error {
        None => {
            let data = state.data.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        Some(e) if e.is_unauthorized() && authenticated => {
            manager.logout().await;
            bail!("session expired, run `folio login` again");
        }
        Some(e) if e.is_unauthorized() => bail!("not signed in, run `folio login` first"),
        Some(e) => Err(e.into()),
    }
}

/// FAR customer tokens cannot be refreshed; a 401 means signing in again.
async fn far_customer_query(
    manager: &Manager,
    storage: &Storage,
    config: &ClientConfig,
    path: &str,
    payload: Value,
) -> anyhow::Result<()> {
    if !manager.is_far_customer() {
        bail!("not in FAR customer mode, run `folio far-login` first");
    }
    let cache = load_cache(storage, config, path, &payload).await?;

    let state = fetch(manager.far_customer_transport(), cache, path, payload).await;
    match state.error {
        None => {
            let data = state.data.unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        Some(e) if e.is_unauthorized() => {
            manager.far_customer_logout().await;
            bail!("FAR customer session expired, run `folio far-login` again");
        }
        Some(e) => Err(e.into()),
    }
}

async fn fetch<T>(transport: T, cache: QueryCache<Storage>, path: &str, payload: Value) -> QueryState
where
    T: Transport + 'static,
{
    QueryClient::new(transport, cache)
        .handle()
        .fetch(path, &payload)
        .await
}

fn print_signed_in(session: &Session) {
    let who = session
        .user
        .as_ref()
        .and_then(|user| user.get("email"))
        .and_then(Value::as_str)
        .unwrap_or("user");
    println!("Signed in as {who}.");
}
