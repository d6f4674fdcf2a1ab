use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config;
use crate::data::{FeedService, RedditFeedService};
use crate::feed::{FeedOptions, FeedSession, FeedUpdate};
use crate::pagination::AdvanceOutcome;
use crate::preferences::{Preferences, PreferencesStore, Theme};
use crate::reddit::{self, SortOption};
use crate::storage;
use crate::view::{GifView, ViewState};

const TICK: Duration = Duration::from_millis(50);
const LOG_ENV: &str = "GIFREEL_LOG";

pub const COMMAND_HELP: &str = "\
Commands:
  <enter>, more        Load the next page
  r <name>             Switch collection (subreddit)
  sort hot|new         Change sort order
  size <n>             Change page size
  theme light|dark|system
  list                 Show everything loaded so far
  save <n>             Save item n of the list
  saved                Show saved items, newest first
  unsave <n>           Remove item n of the saved list
  play <n>, stop <n>   Mark item n as playing / stopped
  help, quit";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub collection: Option<String>,
}

pub fn run(opts: RunOptions) -> Result<()> {
    init_logging();

    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file,
        env_prefix: None,
    })
    .context("load config")?;

    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );
    let prefs = PreferencesStore::new(store);
    if let Err(err) = prefs.load() {
        warn!("starting with default preferences: {err:#}");
    }

    let client = reddit::Client::new(reddit::ClientConfig {
        user_agent: cfg.reddit.user_agent.clone(),
        base_url: Some(cfg.reddit.base_url.clone()),
        timeout: cfg.reddit.timeout,
        http_client: None,
    })
    .context("create reddit client")?;
    let service: Arc<dyn FeedService> = Arc::new(
        RedditFeedService::new(Arc::new(client)).with_upstream_limit(cfg.feed.upstream_limit),
    );

    let collection = opts.collection.unwrap_or(cfg.feed.collection.clone());
    info!(%collection, "starting feed");
    let session = FeedSession::attach(
        service,
        FeedOptions {
            collection,
            debounce: cfg.feed.debounce,
            max_attempts: cfg.feed.max_attempts,
        },
        &prefs,
    );

    let mut app = App::new(session, prefs, io::stdout());
    app.print_theme()?;
    app.event_loop(spawn_input_reader())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn spawn_input_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    More,
    Collection(String),
    Sort(SortOption),
    PageSize(usize),
    Theme(Theme),
    List,
    Save(usize),
    Saved,
    Unsave(usize),
    Play(usize),
    Stop(usize),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Ok(Command::More);
        };
        let arg = parts.next();
        let index = |arg: Option<&str>| {
            arg.and_then(|a| a.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("{head}: expected an item number"))
        };
        match head.to_ascii_lowercase().as_str() {
            "more" | "m" => Ok(Command::More),
            "r" | "open" => arg
                .map(|name| Command::Collection(name.to_string()))
                .ok_or_else(|| "r: expected a collection name".to_string()),
            "sort" => arg
                .and_then(SortOption::from_key)
                .map(Command::Sort)
                .ok_or_else(|| "sort: expected hot or new".to_string()),
            "size" => arg
                .and_then(|a| a.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .map(Command::PageSize)
                .ok_or_else(|| "size: expected a positive number".to_string()),
            "theme" => arg
                .and_then(Theme::from_key)
                .map(Command::Theme)
                .ok_or_else(|| "theme: expected light, dark or system".to_string()),
            "list" | "ls" => Ok(Command::List),
            "save" => index(arg).map(Command::Save),
            "saved" => Ok(Command::Saved),
            "unsave" => index(arg).map(Command::Unsave),
            "play" => index(arg).map(Command::Play),
            "stop" => index(arg).map(Command::Stop),
            "help" | "?" => Ok(Command::Help),
            "quit" | "q" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

struct App<W: Write> {
    session: FeedSession,
    prefs: PreferencesStore,
    view: ViewState,
    /// Rows printed since the last reset; item numbers continue from here.
    shown: usize,
    out: W,
}

impl<W: Write> App<W> {
    fn new(session: FeedSession, prefs: PreferencesStore, out: W) -> Self {
        Self {
            session,
            prefs,
            view: ViewState::default(),
            shown: 0,
            out,
        }
    }

    fn event_loop(&mut self, input: Receiver<String>) -> Result<()> {
        loop {
            crossbeam_channel::select! {
                recv(input) -> line => {
                    let Ok(line) = line else {
                        break;
                    };
                    match Command::parse(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => self.handle(command)?,
                        Err(msg) => writeln!(self.out, "{msg}")?,
                    }
                }
                default(TICK) => {}
            }
            for update in self.session.poll() {
                self.render(update)?;
            }
            self.out.flush()?;
        }
        Ok(())
    }

    fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::More => {
                if !self.session.next_page(None) {
                    writeln!(self.out, "Still loading...")?;
                }
            }
            Command::Collection(name) => self.session.set_collection(&name),
            Command::Sort(sort) => self.update_prefs(Preferences {
                sort,
                ..self.prefs.current()
            })?,
            Command::PageSize(page_size) => self.update_prefs(Preferences {
                page_size,
                ..self.prefs.current()
            })?,
            Command::Theme(theme) => {
                if let Err(err) = self.prefs.set_theme(theme) {
                    writeln!(self.out, "Theme not saved: {err}")?;
                }
                self.print_theme()?;
            }
            Command::List => {
                let rows = self
                    .view
                    .decorate(self.session.records(), &self.prefs.saved_records());
                for (idx, row) in rows.iter().enumerate() {
                    self.print_row(idx + 1, row)?;
                }
            }
            Command::Save(n) => match self.session.records().get(n - 1).cloned() {
                Some(record) if self.prefs.is_saved(&record.permalink) => {
                    writeln!(self.out, "Already saved.")?;
                }
                Some(record) => {
                    let title = record.title.clone();
                    match self.prefs.save_record(record) {
                        Ok(()) => writeln!(self.out, "Saved \"{title}\".")?,
                        Err(err) => writeln!(self.out, "Saved for this session only: {err}")?,
                    }
                }
                None => writeln!(self.out, "No item {n}.")?,
            },
            Command::Saved => {
                let rows = self.view.decorate_saved(&self.prefs.saved_records());
                if rows.is_empty() {
                    writeln!(self.out, "Nothing saved yet.")?;
                }
                for (idx, row) in rows.iter().enumerate() {
                    self.print_row(idx + 1, row)?;
                }
            }
            Command::Unsave(n) => {
                let rows = self.view.decorate_saved(&self.prefs.saved_records());
                match rows.get(n - 1) {
                    Some(row) => {
                        if let Err(err) = self.prefs.unsave_record(&row.record.permalink) {
                            writeln!(self.out, "Removed for this session only: {err}")?;
                        }
                    }
                    None => writeln!(self.out, "No saved item {n}.")?,
                }
            }
            Command::Play(n) => match self.session.records().get(n - 1) {
                Some(record) => {
                    self.view.start_playing(&record.permalink);
                    writeln!(self.out, "Playing {}", record.source_url)?;
                }
                None => writeln!(self.out, "No item {n}.")?,
            },
            Command::Stop(n) => match self.session.records().get(n - 1) {
                Some(record) if self.view.is_playing(&record.permalink) => {
                    self.view.stop_playing(&record.permalink);
                    writeln!(self.out, "Stopped {n}.")?;
                }
                Some(_) => writeln!(self.out, "Item {n} is not playing.")?,
                None => writeln!(self.out, "No item {n}.")?,
            },
            Command::Help => writeln!(self.out, "{COMMAND_HELP}")?,
            Command::Quit => {}
        }
        Ok(())
    }

    fn update_prefs(&mut self, prefs: Preferences) -> Result<()> {
        if let Err(err) = self.prefs.save(prefs) {
            writeln!(self.out, "Preferences applied but not saved: {err}")?;
        }
        Ok(())
    }

    fn render(&mut self, update: FeedUpdate) -> Result<()> {
        match update {
            FeedUpdate::Reset { collection } => {
                self.shown = 0;
                let prefs = self.session.preferences();
                writeln!(
                    self.out,
                    "== r/{} ({}, {} per page) ==",
                    collection,
                    prefs.sort.as_str(),
                    prefs.page_size
                )?;
            }
            FeedUpdate::Appended(records) => {
                let saved = self.prefs.saved_records();
                let rows = self.view.decorate(&records, &saved);
                for row in &rows {
                    self.shown += 1;
                    self.print_row(self.shown, row)?;
                }
            }
            FeedUpdate::Finished(report) => match report.outcome {
                AdvanceOutcome::Satisfied if report.total_found == 0 => {
                    writeln!(self.out, "-- nothing more to show --")?;
                }
                AdvanceOutcome::Satisfied => {
                    writeln!(self.out, "-- {} loaded, <enter> for more --", report.total_found)?;
                }
                AdvanceOutcome::Exhausted => writeln!(
                    self.out,
                    "-- only {} playable after {} tries --",
                    report.total_found, report.attempts
                )?,
                AdvanceOutcome::Cancelled => {}
            },
        }
        Ok(())
    }

    fn print_row(&mut self, idx: usize, row: &GifView) -> Result<()> {
        let mut marks = String::new();
        if row.saved {
            marks.push_str(" [saved]");
        }
        if row.playing {
            marks.push_str(" [playing]");
        }
        writeln!(
            self.out,
            "{:>4}. {}{}\n      u/{} - {} comments - {}",
            idx, row.record.title, marks, row.record.author, row.record.comment_count,
            row.record.source_url
        )?;
        Ok(())
    }

    fn print_theme(&mut self) -> Result<()> {
        let theme = self.prefs.theme();
        match theme.color_attribute() {
            Some(attr) => writeln!(self.out, "Theme: {attr}")?,
            None => writeln!(self.out, "Theme: follows system")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::testing::Repeating;
    use crate::pagination::MAX_ATTEMPTS;
    use tempfile::tempdir;

    fn test_app(service: Repeating, dir: &std::path::Path) -> App<Vec<u8>> {
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.join("state.db")),
            })
            .unwrap(),
        );
        let prefs = PreferencesStore::new(store);
        prefs.load().unwrap();
        let (_tx, rx) = unbounded();
        let session = FeedSession::new(
            Arc::new(service),
            FeedOptions {
                collection: "gifs".into(),
                debounce: Duration::ZERO,
                max_attempts: MAX_ATTEMPTS,
            },
            prefs.current(),
            rx,
        );
        App::new(session, prefs, Vec::new())
    }

    fn item_numbers(out: &[u8]) -> Vec<usize> {
        String::from_utf8_lossy(out)
            .lines()
            .filter_map(|line| line.trim_start().split_once(". "))
            .filter_map(|(n, _)| n.parse().ok())
            .collect()
    }

    #[test]
    fn batches_drained_together_are_numbered_in_order() {
        let dir = tempdir().unwrap();
        let mut app = test_app(Repeating::new(4, 10), dir.path());

        for update in app.session.wait_idle(Duration::from_secs(5)) {
            app.render(update).unwrap();
        }
        assert_eq!(item_numbers(&app.out), (1..=10).collect::<Vec<_>>());

        app.out.clear();
        assert!(app.session.next_page(None));
        for update in app.session.wait_idle(Duration::from_secs(5)) {
            app.render(update).unwrap();
        }
        assert_eq!(item_numbers(&app.out), (11..=20).collect::<Vec<_>>());

        app.out.clear();
        app.handle(Command::Save(12)).unwrap();
        let saved = app.prefs.saved_records();
        assert_eq!(saved[0].id, app.session.records()[11].id);
    }

    #[test]
    fn stop_reports_items_that_are_not_playing() {
        let dir = tempdir().unwrap();
        let mut app = test_app(Repeating::new(2, 2), dir.path());
        app.session.wait_idle(Duration::from_secs(5));

        app.handle(Command::Stop(1)).unwrap();
        app.handle(Command::Play(1)).unwrap();
        app.handle(Command::Stop(1)).unwrap();
        let out = String::from_utf8(app.out.clone()).unwrap();
        assert!(out.contains("Item 1 is not playing."), "{out}");
        assert!(out.contains("Stopped 1."), "{out}");
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse(""), Ok(Command::More));
        assert_eq!(Command::parse("r aww"), Ok(Command::Collection("aww".into())));
        assert_eq!(Command::parse("sort NEW"), Ok(Command::Sort(SortOption::New)));
        assert_eq!(Command::parse("size 25"), Ok(Command::PageSize(25)));
        assert_eq!(Command::parse("theme dark"), Ok(Command::Theme(Theme::Dark)));
        assert_eq!(Command::parse("save 3"), Ok(Command::Save(3)));
        assert_eq!(Command::parse("q"), Ok(Command::Quit));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Command::parse("size 0").is_err());
        assert!(Command::parse("save zero").is_err());
        assert!(Command::parse("unsave 0").is_err());
        assert!(Command::parse("sort top").is_err());
        assert!(Command::parse("r").is_err());
        assert!(Command::parse("dance").is_err());
    }
}
