//! Basic example of the Masna DI container.

use std::sync::Arc;

use masna::prelude::*;

// === Define your traits and types ===

trait Logger: Send + Sync {
    fn log(&self, msg: &str);
}

#[derive(Default, Component)]
struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, msg: &str) {
        println!("[LOG] {msg}");
    }
}

#[derive(Default, Component)]
struct Config {
    #[masna(value = "postgres://localhost/myapp", expose)]
    database_url: String,
    #[masna(value = "true", expose)]
    debug: bool,
}

#[derive(Default, Component)]
#[masna(methods(init))]
struct Database {
    #[masna(value = "${config.database_url}")]
    url: String,
    #[masna(wire = "type")]
    logger: Option<Arc<dyn Logger>>,
}

impl Database {
    fn init(&mut self) {
        if let Some(logger) = &self.logger {
            logger.log(&format!("Connected to {}", self.url));
        }
    }

    fn query(&self, sql: &str) -> String {
        if let Some(logger) = &self.logger {
            logger.log(&format!("Executing: {sql}"));
        }
        format!("Results from {}", self.url)
    }
}

#[derive(Default, Component)]
struct UserRepository {
    #[masna(wire = "auto")]
    db: Option<Arc<Database>>,
}

impl UserRepository {
    fn find_user(&self, id: u64) -> String {
        match &self.db {
            Some(db) => db.query(&format!("SELECT * FROM users WHERE id = {id}")),
            None => String::from("no database"),
        }
    }
}

#[derive(Default, Component)]
struct UserService {
    #[masna(wire = "type")]
    repo: Option<Arc<UserRepository>>,
    #[masna(wire = "type")]
    logger: Option<Arc<dyn Logger>>,
    #[masna(value = "${config.debug}")]
    verbose: bool,
}

impl UserService {
    fn get_user(&self, id: u64) -> String {
        if let (true, Some(logger)) = (self.verbose, &self.logger) {
            logger.log(&format!("Getting user {id}"));
        }
        self.repo
            .as_ref()
            .map(|repo| repo.find_user(id))
            .unwrap_or_default()
    }
}

fn main() -> Result<()> {
    // Initialize tracing (logging)
    tracing_subscriber::fmt()
        .with_env_filter("masna_container=debug")
        .init();

    let container = Container::new();

    // Declarations are lazy; nothing is built yet
    container.named_singleton::<Config>("config")?;
    container
        .singleton::<ConsoleLogger>()?
        .implements::<dyn Logger>(|logger| logger);
    container.singleton::<Database>()?.name("db")?;
    container.singleton::<UserRepository>()?;
    container.singleton::<UserService>()?;

    let service: Arc<UserService> = container.find()?;
    println!("{}", service.get_user(42));

    // Same instance every time
    let again: Arc<UserService> = container.find()?;
    assert!(Arc::ptr_eq(&service, &again));

    tracing::info!(
        url = %container.evaluate("${config.database_url}")?,
        "Done"
    );
    Ok(())
}
