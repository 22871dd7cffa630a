//! Basic example of the Rabt DI container.
//!
//! Run with `cargo run -p rabt --example basic`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rabt::prelude::*;

// === Define your traits and types ===

trait Logger: Send + Sync {
    fn log(&self, msg: &str);
}

#[derive(Injectable)]
#[injectable(provides = "dyn Logger")]
struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, msg: &str) {
        println!("[LOG] {msg}");
    }
}

/// Prefixes every line with a timestamp-like counter.
#[derive(Injectable)]
#[injectable(provides = "dyn Logger")]
struct NumberedLogger {
    inner: Arc<dyn Logger>,
    #[inject(skip)]
    line: AtomicU64,
}

impl Logger for NumberedLogger {
    fn log(&self, msg: &str) {
        let line = self.line.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.log(&format!("#{line} {msg}"));
    }
}

struct Config {
    database_url: String,
}

#[derive(Injectable)]
#[injectable(disposable)]
struct Database {
    config: Arc<Config>,
    logger: Arc<dyn Logger>,
}

impl Database {
    fn query(&self, sql: &str) -> String {
        self.logger.log(&format!("Executing: {sql}"));
        format!("Results from {}", self.config.database_url)
    }
}

impl Dispose for Database {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        self.logger.log("Closing database connections");
        Ok(())
    }
}

#[derive(Injectable)]
#[injectable(disposable)]
struct UnitOfWork {
    db: Arc<Database>,
    logger: Arc<dyn Logger>,
}

impl UnitOfWork {
    fn find_user(&self, id: u64) -> String {
        self.db.query(&format!("SELECT * FROM users WHERE id = {id}"))
    }
}

impl Dispose for UnitOfWork {
    fn dispose(&self) -> std::result::Result<(), BoxError> {
        self.logger.log("Committing unit of work");
        Ok(())
    }
}

#[derive(Injectable)]
struct UserService {
    work: Arc<UnitOfWork>,
    logger: Arc<dyn Logger>,
    #[inject(name = "greeting", default = "Arc::new(String::from(\"Hello\"))")]
    greeting: Arc<String>,
}

impl UserService {
    fn get_user(&self, id: u64) -> String {
        self.logger.log(&format!("{}, user {id}", self.greeting));
        self.work.find_user(id)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("rabt=debug,rabt_container=debug")
        .init();

    let container = Container::new();

    // Config: a pre-built value
    container.register_instance(Arc::new(Config {
        database_url: "postgres://localhost/myapp".to_string(),
    }))?;

    // Logger: singleton, then decorated
    container.register::<dyn Logger, ConsoleLogger>(Lifetime::Singleton)?;
    container.register_decorator::<dyn Logger, NumberedLogger>()?;

    // Database: singleton, disposed with the container
    container.register_type::<Database>(Lifetime::Singleton)?;

    // UnitOfWork: one per scope, disposed with the scope
    container.register_type::<UnitOfWork>(Lifetime::Scoped)?;

    // UserService: new each time
    container.register_type::<UserService>(Lifetime::Transient)?;

    container.validate()?;
    println!("✅ Container validated");
    println!("{container:?}");

    // === Create a scope (e.g., for an HTTP request) ===
    {
        let scope = container.create_scope()?;

        let service = scope.resolve::<UserService>()?;
        println!("👤 {}", service.get_user(42));

        // Resolve again in the same scope: UnitOfWork is reused
        let again = scope.resolve::<UserService>()?;
        println!("👤 {}", again.get_user(7));
        println!("🔁 same unit of work: {}", Arc::ptr_eq(&service.work, &again.work));
    }
    // Scope dropped here: the unit of work is committed

    // === Resolving a scoped service outside a scope fails ===
    match container.resolve::<UnitOfWork>() {
        Ok(_) => println!("unexpected"),
        Err(e) => println!("❌ {e}"),
    }

    // === Deferred resolution ===
    let lazy = container.get::<Lazy<Database>>()?;
    println!("💤 database resolved yet: {}", lazy.is_resolved());
    println!("📦 {}", lazy.get()?.query("SELECT 1"));

    container.dispose();
    println!("🧹 Container disposed");

    Ok(())
}
