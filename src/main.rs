//! marksync: per-user bookmark lists kept in sync across sessions.
//!
//! Entry point: runs a console demo with two sessions for one user and one for
//! another user over an in-memory database, showing optimistic writes and
//! change-feed convergence.

use marksync::app::{App, AppStorage};
use marksync::logging;
use marksync::managers::bookmark_session::BookmarkSession;

type DemoResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> DemoResult {
    logging::init("warn");

    println!();
    println!("  marksync v{} demo mode", env!("CARGO_PKG_VERSION"));
    println!();

    let app = App::in_memory()?;
    let mut laptop = app.open_session("alice").await?;
    let mut phone = app.open_session("alice").await?;
    let mut other = app.open_session("bob").await?;
    settle(&mut [&mut laptop, &mut phone, &mut other]);

    section("Optimistic add");
    let rust = laptop.add_bookmark("Rust", "rust-lang.org").await?;
    laptop.add_bookmark("Tokio docs", "https://docs.rs/tokio").await?;
    other.add_bookmark("Bob's page", "example.org").await?;
    show("laptop", &laptop);
    settle(&mut [&mut laptop, &mut phone, &mut other]);
    show("phone after feed", &phone);
    show("bob", &other);

    section("Validation");
    for (title, url) in [("", "example.com"), ("Broken", "not a url")] {
        match laptop.add_bookmark(title, url).await {
            Ok(_) => println!("  unexpectedly accepted {:?}", url),
            Err(err) => println!("  rejected: {}", err),
        }
    }

    section("Optimistic delete");
    let pending = phone.delete_bookmark(&rust.id)?;
    show("phone before remote delete", &phone);
    println!("  remote delete: {:?}", pending.outcome().await?);
    settle(&mut [&mut laptop, &mut phone, &mut other]);
    show("laptop after feed", &laptop);

    section("Search");
    println!("  {}", laptop.store().summary("tokio"));

    section("Teardown");
    println!("  status before: {}", laptop.status().label());
    laptop.end();
    println!("  status after:  {}", laptop.status().label());
    let open = app.hub().map_or(0, |hub| hub.active_channels().len());
    println!("  open channels: {}", open);
    println!();
    Ok(())
}

fn section(name: &str) {
    let rule = "─".repeat(63);
    println!("{}", rule);
    println!("  {}", name);
    println!("{}", rule);
}

fn settle(sessions: &mut [&mut BookmarkSession<AppStorage>]) {
    for session in sessions.iter_mut() {
        session.process_pending();
    }
}

fn show(label: &str, session: &BookmarkSession<AppStorage>) {
    println!(
        "  [{}] {} ({}, {})",
        label,
        session.store().summary(""),
        session.owner(),
        session.status().label()
    );
    for bookmark in session.query("") {
        println!("    - {} <{}>", bookmark.title, bookmark.url);
    }
}
