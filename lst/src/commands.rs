//! Command implementation for lst.

use std::io;

use crossterm::style::Stylize;
use regex::Regex;
use tracing::{debug, info};

use stash::{
    ClientOptions, ElasticClient, Mode, NoTunnel, Profile, ProfileStore, QueryCriteria, RelativeDuration,
    RenderTemplate, Renderer, SshTunnel, SystemClock, TailOptions, Tailer, TimeFilter, TunnelProvider,
};

use crate::terminal::{self, TerminalPrompt};
use crate::Cli;

/// Whether any flag that describes the connection itself was given.
fn has_profile_flags(cli: &Cli) -> bool {
    cli.url.is_some() || cli.format.is_some() || cli.index_pattern.is_some() || cli.user.is_some() || cli.ssh.is_some()
}

/// Profile to use for this run. Connection flags replace the stored profile
/// as a whole; otherwise the stored one is loaded.
pub fn resolve_profile(cli: &Cli, store: &ProfileStore) -> stash::Result<Profile> {
    let mut profile = if has_profile_flags(cli) {
        debug!(profile = %cli.profile, "connection flags given, ignoring stored profile");
        let mut profile = Profile::named(&cli.profile);
        if let Some(url) = &cli.url {
            profile.url = url.clone();
        }
        if let Some(format) = &cli.format {
            profile.format = format.clone();
        }
        if let Some(pattern) = &cli.index_pattern {
            profile.index_pattern = pattern.clone();
        }
        profile.user = cli.user.clone();
        profile.ssh_tunnel = cli.ssh.clone();
        profile
    } else {
        store.load(&cli.profile)?
    };

    if let Some(field) = &cli.timestamp_field {
        profile.timestamp_field = field.clone();
    }
    if cli.save {
        profile.terms = cli.terms.clone();
    }
    Ok(profile)
}

/// Search criteria from flags and profile, with every time value checked.
pub fn build_criteria(cli: &Cli, profile: &Profile) -> stash::Result<QueryCriteria> {
    let duration = cli.duration.as_deref().map(str::parse::<RelativeDuration>).transpose()?;
    let time = TimeFilter {
        after: cli.after.clone(),
        before: cli.before.clone(),
        duration,
    };

    // With --save the command line terms already are the profile's terms.
    let mut criteria = QueryCriteria::new(&profile.timestamp_field)
        .with_terms(profile.terms.iter().cloned())
        .with_time(time);
    if !cli.save {
        criteria = criteria.and_terms(cli.terms.iter().cloned());
    }
    if let Some(sources) = &cli.sources {
        criteria = criteria.with_sources(sources);
    }
    if let Some(id) = &cli.id {
        criteria = criteria.with_correlation_id(id);
    }
    criteria.validate()?;
    Ok(criteria)
}

fn color_enabled(cli: &Cli) -> bool {
    !cli.no_color && std::env::var_os("NO_COLOR").is_none()
}

fn mode(cli: &Cli) -> Mode {
    if cli.list_sources {
        Mode::ListSources
    } else if cli.tail {
        Mode::ContinuousFollow
    } else {
        Mode::PagedFollow
    }
}

pub fn run(cli: Cli) -> stash::Result<()> {
    let store = ProfileStore::default_location()?;
    let profile = resolve_profile(&cli, &store)?;

    // Everything below this point may touch the network, so bad input is
    // rejected first.
    let criteria = build_criteria(&cli, &profile)?;
    let index_pattern = Regex::new(&profile.index_pattern)?;
    let renderer = Renderer::new(RenderTemplate::parse(&profile.format), &profile.timestamp_field)
        .with_color(color_enabled(&cli));

    let password = match &profile.user {
        Some(_) => Some(terminal::read_password("Enter password: ")?),
        None => None,
    };

    let banner = format!("Profile: {} Host: {}", profile.name, profile.url);
    if color_enabled(&cli) {
        println!("{}", banner.magenta());
    } else {
        println!("{}", banner);
    }

    let mut tunnel: Box<dyn TunnelProvider> = match &profile.ssh_tunnel {
        Some(spec) => Box::new(SshTunnel::new(spec.parse()?)),
        None => Box::new(NoTunnel),
    };
    let url = tunnel.establish(&profile.url)?.unwrap_or_else(|| profile.url.clone());

    let mut options = ClientOptions::new(url);
    if let (Some(user), Some(password)) = (&profile.user, password) {
        options = options.with_basic_auth(user, password);
    }

    let mode = mode(&cli);
    if mode == Mode::ContinuousFollow {
        println!("In Tail Mode... Starting with the most recent {} entries!", cli.entries);
    }

    let client = ElasticClient::connect(options)?;

    let mut tail_options = TailOptions::new(criteria, renderer, index_pattern);
    tail_options.initial_entries = cli.entries;
    tail_options.watch = cli.watch.clone();

    let mut tailer = Tailer::open(&client, tail_options, io::stdout(), SystemClock)?;

    // Only settings that reached a backend and selected indices are kept.
    store.save(&profile)?;
    if cli.set_as_default {
        store.set_default(&profile.name)?;
    }
    info!(mode = ?mode, "starting");
    tailer.run(mode, &mut TerminalPrompt)
}
