//! Dashboard controller.
//!
//! Single owner of the subscription registry. User commands, session events
//! and completions of remote work (initial fetch, join, leave) are all
//! applied here, one at a time, on the controller task.

use crate::command::Command;
use crate::presenter::{Notice, Presenter};
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use stockfeed_core::{BoxFuture, CoreError, Key, Snapshot};
use stockfeed_feed::{
    AddOutcome, EntryId, FeedError, MessageParser, PriceUpdate, RecordOutcome, RemoveOutcome,
    SubscriptionRegistry,
};
use stockfeed_quote::{DynQuoteSource, QuoteResult};
use stockfeed_telemetry::Metrics;
use stockfeed_ws::{
    Ack, ConnectionState, DynGroupMembership, Invocation, SessionEvent, WsResult,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Completion of remote work started by the controller.
#[derive(Debug)]
enum RemoteOutcome {
    Seeded {
        key: Key,
        id: EntryId,
        result: QuoteResult<Option<f64>>,
    },
    Joined {
        key: Key,
        id: EntryId,
        connection: u64,
        result: WsResult<Ack>,
    },
    Left {
        key: Key,
        result: WsResult<Ack>,
    },
}

pub struct DashboardController {
    registry: SubscriptionRegistry,
    membership: DynGroupMembership,
    quotes: DynQuoteSource,
    presenter: Box<dyn Presenter>,
    parser: MessageParser,
    pending: FuturesUnordered<BoxFuture<'static, RemoteOutcome>>,
    /// Entries whose initial fetch is still running; they join once it ends.
    seeding: HashSet<EntryId>,
    /// Requested on the first transition to `Connected`, then emptied.
    initial_keys: Vec<String>,
    state: ConnectionState,
    /// Connection whose subscriptions have been replayed. Joins are only
    /// issued once this is set, so each key joins once per connection.
    connection: Option<u64>,
}

impl DashboardController {
    pub fn new(
        registry: SubscriptionRegistry,
        membership: DynGroupMembership,
        quotes: DynQuoteSource,
        presenter: Box<dyn Presenter>,
        initial_keys: Vec<String>,
    ) -> Self {
        Self {
            registry,
            membership,
            quotes,
            presenter,
            parser: MessageParser::new(),
            pending: FuturesUnordered::new(),
            seeding: HashSet::new(),
            initial_keys,
            state: ConnectionState::Disconnected,
            connection: None,
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Remote calls not yet completed.
    pub fn pending_remote(&self) -> usize {
        self.pending.len()
    }

    /// Add a key.
    ///
    /// Invalid input is rejected before any side effect. A new key gets its
    /// initial price fetched and is then joined on the hub; a key already
    /// present only triggers `on_duplicate`.
    pub fn request_add(&mut self, raw: &str) -> Result<AddOutcome, CoreError> {
        let key = Key::parse(raw)?;
        let outcome = self.registry.add(key.clone());
        match outcome {
            AddOutcome::Added(id) => {
                info!(key = %key, "Key added");
                Metrics::subscriptions(self.registry.len());
                self.schedule_seed(key, id);
            }
            AddOutcome::AlreadyPresent => {
                self.presenter.on_duplicate(&key);
            }
        }
        Ok(outcome)
    }

    /// Remove a key. The hub leave is best-effort; local state goes at once.
    pub fn request_remove(&mut self, raw: &str) -> Result<RemoveOutcome, CoreError> {
        let key = Key::parse(raw)?;
        let id = self.registry.entry(&key).map(|entry| entry.id);
        let outcome = self.registry.remove(&key);

        match outcome {
            RemoveOutcome::Removed => {
                if let Some(id) = id {
                    self.seeding.remove(&id);
                }
                if self.state == ConnectionState::Connected {
                    self.schedule_leave(key.clone());
                } else {
                    debug!(key = %key, "Not connected, skipping leave");
                }
                info!(key = %key, "Key removed");
                Metrics::subscriptions(self.registry.len());
                self.presenter.on_removed(&key);
            }
            RemoveOutcome::NotFound => {
                debug!(key = %key, "Remove requested for unknown key");
            }
        }
        Ok(outcome)
    }

    /// Apply a price push. Unknown keys are dropped silently.
    pub fn handle_inbound(&mut self, update: PriceUpdate) -> Option<Snapshot> {
        match self.registry.record_observation(&update.key, update.value) {
            Ok(RecordOutcome::Updated(snapshot)) => {
                Metrics::inbound("applied");
                self.presenter.on_snapshot(&update.key, &snapshot);
                Some(snapshot)
            }
            Ok(RecordOutcome::NotFound) => {
                trace!(key = %update.key, "Update for unsubscribed key");
                Metrics::inbound("unknown_key");
                None
            }
            Err(e) => {
                warn!(key = %update.key, error = %e, "Dropping invalid observation");
                Metrics::inbound("invalid_value");
                None
            }
        }
    }

    /// Join every registered key on a fresh connection.
    ///
    /// Entries still waiting for their initial fetch are skipped; they join
    /// when the fetch completes. Returns the number of joins scheduled.
    pub fn handle_reconnected(&mut self) -> usize {
        let Some(connection) = self.connection else {
            debug!("No replayable connection, skipping join replay");
            return 0;
        };
        let targets: Vec<(Key, EntryId)> = self
            .registry
            .keys()
            .into_iter()
            .filter_map(|key| {
                let id = self.registry.entry(&key)?.id;
                (!self.seeding.contains(&id)).then_some((key, id))
            })
            .collect();

        let count = targets.len();
        for (key, id) in targets {
            self.schedule_join(key, id, connection);
        }
        info!(connection, joins = count, "Replaying subscriptions after connect");
        count
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => self.handle_state_changed(state),
            SessionEvent::Reconnected { connection_id } => {
                if connection_id > 1 {
                    Metrics::ws_reconnect();
                }
                self.connection = Some(connection_id);
                self.handle_reconnected();
            }
            SessionEvent::Invocation(invocation) => self.handle_invocation(&invocation),
        }
    }

    /// Apply a user command. Returns false when the user asked to quit.
    pub fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Add(raw) => {
                if let Err(e) = self.request_add(&raw) {
                    warn!(input = %raw, error = %e, "Rejected key");
                }
            }
            Command::Remove(raw) => {
                if let Err(e) = self.request_remove(&raw) {
                    warn!(input = %raw, error = %e, "Rejected key");
                }
            }
            Command::List => self.log_registry(),
            Command::Quit => return false,
        }
        true
    }

    /// Wait for every in-flight remote call, including follow-up work they
    /// schedule.
    pub async fn drain_pending(&mut self) {
        while let Some(outcome) = self.pending.next().await {
            self.apply_outcome(outcome);
        }
    }

    /// Event loop. Ends on shutdown, on `quit`, or when the session's event
    /// channel closes.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        mut commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) {
        let mut commands_open = true;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping controller");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => self.handle_session_event(event),
                    None => {
                        info!("Session event channel closed");
                        break;
                    }
                },

                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            info!("Quit requested");
                            break;
                        }
                    }
                    None => commands_open = false,
                },

                Some(outcome) = self.pending.next(), if !self.pending.is_empty() => {
                    self.apply_outcome(outcome);
                }
            }
        }
    }

    fn handle_state_changed(&mut self, state: ConnectionState) {
        self.state = state;
        Metrics::ws_state_set(state.as_str());
        self.presenter.on_connection_state_changed(state);

        if state != ConnectionState::Connected {
            self.connection = None;
        }

        match state {
            ConnectionState::Disconnected => self.registry.reset_joined(),
            ConnectionState::Connected if !self.initial_keys.is_empty() => {
                for raw in std::mem::take(&mut self.initial_keys) {
                    if let Err(e) = self.request_add(&raw) {
                        warn!(input = %raw, error = %e, "Skipping initial key");
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_invocation(&mut self, invocation: &Invocation) {
        match self.parser.parse(invocation) {
            Ok(update) => {
                self.handle_inbound(update);
            }
            Err(FeedError::UnexpectedTarget(target)) => {
                debug!(%target, "Ignoring hub invocation");
                Metrics::inbound("ignored");
            }
            Err(e) => {
                warn!(error = %e, "Malformed price update");
                Metrics::inbound("malformed");
            }
        }
    }

    fn schedule_seed(&mut self, key: Key, id: EntryId) {
        self.seeding.insert(id);
        let quotes = Arc::clone(&self.quotes);
        self.pending.push(Box::pin(async move {
            let result = quotes.fetch_price(key.as_str()).await;
            RemoteOutcome::Seeded { key, id, result }
        }));
    }

    fn schedule_join(&mut self, key: Key, id: EntryId, connection: u64) {
        let membership = Arc::clone(&self.membership);
        self.pending.push(Box::pin(async move {
            let result = membership.join_group(key.as_str()).await;
            RemoteOutcome::Joined {
                key,
                id,
                connection,
                result,
            }
        }));
    }

    fn schedule_leave(&mut self, key: Key) {
        let membership = Arc::clone(&self.membership);
        self.pending.push(Box::pin(async move {
            let result = membership.leave_group(key.as_str()).await;
            RemoteOutcome::Left { key, result }
        }));
    }

    fn apply_outcome(&mut self, outcome: RemoteOutcome) {
        match outcome {
            RemoteOutcome::Seeded { key, id, result } => self.apply_seed(key, id, result),
            RemoteOutcome::Joined {
                key,
                id,
                connection,
                result,
            } => self.apply_join(key, id, connection, result),
            RemoteOutcome::Left { key, result } => match result {
                Ok(_) => debug!(key = %key, "Left price group"),
                Err(e) => {
                    warn!(key = %key, error = %e, "Leave failed");
                    Metrics::remote_failure("leave");
                    self.presenter.on_notice(&key, Notice::LeaveFailed(e.to_string()));
                }
            },
        }
    }

    fn apply_seed(&mut self, key: Key, id: EntryId, result: QuoteResult<Option<f64>>) {
        self.seeding.remove(&id);
        if !self.registry.is_current(&key, id) {
            debug!(key = %key, "Initial price for removed key, discarding");
            return;
        }

        match result {
            Ok(Some(price)) => {
                self.handle_inbound(PriceUpdate {
                    key: key.clone(),
                    value: price,
                });
            }
            Ok(None) => self.presenter.on_notice(&key, Notice::PriceUnavailable),
            Err(e) => {
                warn!(key = %key, error = %e, "Initial price fetch failed");
                Metrics::remote_failure("fetch");
                self.presenter.on_notice(&key, Notice::FetchFailed(e.to_string()));
            }
        }

        // Joined regardless of the fetch outcome; pushes may still arrive.
        // Before the replay of the current connection, the replay joins it.
        match self.connection {
            Some(connection) => self.schedule_join(key, id, connection),
            None => debug!(key = %key, "Connection not replayed yet, join deferred"),
        }
    }

    fn apply_join(&mut self, key: Key, id: EntryId, connection: u64, result: WsResult<Ack>) {
        if self.connection != Some(connection) {
            debug!(
                key = %key,
                connection,
                "Join completion from a previous connection, discarding"
            );
            return;
        }
        if !self.registry.is_current(&key, id) {
            debug!(key = %key, "Join completion for removed key, discarding");
            return;
        }
        match result {
            Ok(_) => {
                self.registry.mark_joined(&key, id);
                debug!(key = %key, "Joined price group");
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Join failed");
                Metrics::remote_failure("join");
                self.presenter.on_notice(&key, Notice::JoinFailed(e.to_string()));
            }
        }
    }

    fn log_registry(&self) {
        info!(count = self.registry.len(), state = %self.state, "Subscriptions");
        for key in self.registry.keys() {
            let snapshot = self
                .registry
                .snapshot(&key)
                .and_then(|snapshot| serde_json::to_string(&snapshot).ok())
                .unwrap_or_else(|| "null".to_string());
            let joined = self
                .registry
                .entry(&key)
                .is_some_and(|entry| entry.joined_remote);
            info!(key = %key, joined, %snapshot, "Subscription");
        }
    }
}
