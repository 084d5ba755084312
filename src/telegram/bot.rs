use crate::telegram::api::BotApi;
use crate::telegram::types::{Audio, Message, Update};
use crate::vault::archive::{ArchiveOutcome, ArchiveService};
use crate::vault::config::BotConfig;
use crate::vault::descriptor::MediaDescriptor;
use crate::vault::listing::render_file_list;
use crate::vault::reconcile::MediaFetcher;
use crate::vault::store::RecordStore;
use anyhow::Result;
use std::thread;
use std::time::Duration;

pub const GREETING: &str = "Send me audio and I will keep a copy. Tap /list to see what is saved.";
pub const ALREADY_SAVED: &str = "already saved";

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    List,
}

/// Recognise `/start` and `/list`, optionally addressed as `/list@somebot`.
pub fn parse_command(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "list" => Some(Command::List),
        _ => None,
    }
}

pub fn descriptor_from_audio(audio: &Audio) -> MediaDescriptor {
    MediaDescriptor {
        unique_media_id: audio.file_unique_id.clone(),
        source_ref: audio.file_id.clone(),
        performer: audio.performer.clone(),
        title: audio.title.clone(),
        file_name: audio.file_name.clone(),
        mime_type: audio.mime_type.clone(),
        file_size: audio.file_size,
        duration: audio.duration,
    }
}

pub fn outcome_reply(outcome: &ArchiveOutcome) -> String {
    match outcome {
        ArchiveOutcome::Saved(name) => format!("saved: \"{name}\""),
        ArchiveOutcome::AlreadyKnown => ALREADY_SAVED.to_string(),
        ArchiveOutcome::Failed(err) => format!("ERROR\n{err}"),
    }
}

/// Turns one incoming message into the replies it deserves.
pub struct BotHandler<'a, S, F> {
    service: &'a ArchiveService<S, F>,
    config: &'a BotConfig,
}

impl<'a, S: RecordStore, F: MediaFetcher> BotHandler<'a, S, F> {
    pub fn new(service: &'a ArchiveService<S, F>, config: &'a BotConfig) -> Self {
        Self { service, config }
    }

    /// An empty result means the message is ignored.
    pub fn handle(&self, message: &Message) -> Vec<String> {
        let Some(owner_id) = message.from.as_ref().map(|user| user.id) else {
            tracing::debug!(message = message.message_id, "ignoring message without sender");
            return Vec::new();
        };
        if !self.config.owner_allowed(owner_id) {
            tracing::info!(owner = owner_id, "ignoring message from owner outside allow list");
            return Vec::new();
        }

        if let Some(audio) = &message.audio {
            let outcome = self.service.archive(owner_id, &descriptor_from_audio(audio));
            return vec![outcome_reply(&outcome)];
        }

        match message.text.as_deref().and_then(parse_command) {
            Some(Command::Start) => vec![GREETING.to_string()],
            Some(Command::List) => self.list(owner_id),
            None => {
                tracing::debug!(
                    owner = owner_id,
                    message = message.message_id,
                    text = message.text.as_deref().unwrap_or(""),
                    "unhandled message"
                );
                Vec::new()
            }
        }
    }

    fn list(&self, owner_id: i64) -> Vec<String> {
        match self.service.store().list_filenames(owner_id) {
            Ok(names) => render_file_list(&names, self.config.list_chunk_chars),
            Err(err) => vec![format!("ERROR\n{err}")],
        }
    }
}

fn next_offset(updates: &[Update], current: Option<i64>) -> Option<i64> {
    updates
        .iter()
        .map(|u| u.update_id + 1)
        .max()
        .max(current)
}

fn deliver(api: &BotApi, message: &Message, replies: &[String]) {
    for text in replies {
        if let Err(err) = api.send_message(message.chat.id, text, Some(message.message_id)) {
            tracing::warn!(
                chat = message.chat.id,
                message = message.message_id,
                error = %format!("{err:#}"),
                "failed to send reply"
            );
        }
    }
}

/// Long-poll forever. Each batch is handled with one thread per update; the
/// offset only advances once the whole batch has been answered.
pub fn run<S: RecordStore, F: MediaFetcher>(
    api: &BotApi,
    service: &ArchiveService<S, F>,
    config: &BotConfig,
) -> Result<()> {
    let me = api.get_me()?;
    tracing::info!(
        bot = me.username.as_deref().unwrap_or(""),
        id = me.id,
        "bot connected; polling for updates"
    );

    let handler = BotHandler::new(service, config);
    let mut offset = None;
    let mut backoff = MIN_BACKOFF;

    loop {
        let updates = match api.get_updates(offset, config.poll_timeout_secs) {
            Ok(updates) => {
                backoff = MIN_BACKOFF;
                updates
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), retry_in_secs = backoff.as_secs(), "polling failed");
                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        thread::scope(|scope| {
            for update in &updates {
                let Some(message) = &update.message else {
                    continue;
                };
                let handler = &handler;
                scope.spawn(move || {
                    let replies = handler.handle(message);
                    deliver(api, message, &replies);
                });
            }
        });

        offset = next_offset(&updates, offset);
    }
}
