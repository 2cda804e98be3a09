//! Session orchestration
//!
//! Each reader goes through connect, exclusive access, raw APDUs, security
//! domain selection, the diversification gate, authentication when a
//! privileged verb was requested, and dispatch. The connection is released
//! on every path out of a reader. Failures are classified into an explicit
//! per-reader outcome which the reader loop turns into continue or abort.

use tracing::{debug, info, warn};

use crate::{
    Error, ErrorKind, Result,
    card::{CardManager, Terminal},
    classify::{Stage, Verdict, classify},
    config::{Config, ReaderSelection},
    dispatch::{self, Dispatcher},
    gate,
    report::Reporter,
};

/// How one reader's session ended
#[derive(Debug)]
pub enum ReaderOutcome {
    /// Every step ran; errors tolerated in relaxed mode are kept
    Completed {
        /// Protocol errors that were logged and skipped over
        tolerated: Vec<Error>,
    },
    /// The reader was given up on, the run went on
    Skipped(Error),
}

impl ReaderOutcome {
    /// Whether the session ran to the end
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Result of a whole run that was not aborted
#[derive(Debug, Default)]
pub struct RunReport {
    /// Visited readers in order with their outcome
    pub readers: Vec<(String, ReaderOutcome)>,
}

impl RunReport {
    /// A run succeeds when at least one reader completed, or when every
    /// skipped reader was only rejected by the card in relaxed mode
    pub fn success(&self) -> bool {
        let tolerated = |(_, outcome): &(String, ReaderOutcome)| match outcome {
            ReaderOutcome::Completed { .. } => true,
            ReaderOutcome::Skipped(error) => error.kind() == ErrorKind::Protocol,
        };
        self.readers.iter().any(|(_, outcome)| outcome.is_completed())
            || (!self.readers.is_empty() && self.readers.iter().all(tolerated))
    }

    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }

    /// Outcome for a reader by name
    pub fn outcome(&self, reader: &str) -> Option<&ReaderOutcome> {
        self.readers
            .iter()
            .find(|(name, _)| name == reader)
            .map(|(_, outcome)| outcome)
    }
}

/// A failure together with the stage it happened in
type Failure = (Stage, Error);

/// Drives a configured run over the readers of a terminal
pub struct Orchestrator<'a, T> {
    terminal: &'a mut T,
    config: &'a Config,
    reporter: &'a mut dyn Reporter,
}

impl<T> std::fmt::Debug for Orchestrator<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a, T: Terminal> Orchestrator<'a, T> {
    /// Create an orchestrator
    pub fn new(terminal: &'a mut T, config: &'a Config, reporter: &'a mut dyn Reporter) -> Self {
        Self {
            terminal,
            config,
            reporter,
        }
    }

    /// Run the configured request against every selected reader
    ///
    /// Returns `Err` when a failure aborts the whole run.
    pub fn run(&mut self) -> Result<RunReport> {
        let readers = self.select_readers()?;
        let mut report = RunReport::default();

        for reader in readers {
            info!(%reader, "processing reader");
            let outcome = self.run_reader(&reader)?;
            if let ReaderOutcome::Skipped(error) = &outcome {
                warn!(%reader, %error, "skipping reader");
                self.reporter
                    .warning(&format!("Skipping reader {reader}: {error}"));
            }
            report.readers.push((reader, outcome));
        }

        Ok(report)
    }

    /// Resolve the reader selection against the terminal
    pub fn select_readers(&mut self) -> Result<Vec<String>> {
        let readers = self.terminal.list_readers()?;
        debug!(count = readers.len(), "readers found");

        match &self.config.readers {
            ReaderSelection::Named(name) => readers
                .into_iter()
                .find(|reader| &reader.name == name)
                .map(|reader| vec![reader.name])
                .ok_or_else(|| Error::Usage(format!("Reader \"{name}\" not found"))),
            ReaderSelection::WithCard { all } => {
                let with_card: Vec<String> = readers
                    .into_iter()
                    .filter(|reader| reader.card_present)
                    .map(|reader| reader.name)
                    .collect();
                match with_card.len() {
                    0 => Err(Error::transport("reader selection", "no reader with a card found")),
                    1 => Ok(with_card),
                    _ if *all => Ok(with_card),
                    _ => Err(Error::Usage(
                        "More than one reader with a card found, run with --all to work with all of them"
                            .into(),
                    )),
                }
            }
        }
    }

    /// One reader from connect to release
    fn run_reader(&mut self, reader: &str) -> Result<ReaderOutcome> {
        let result = match self.terminal.connect(reader) {
            Ok(mut card) => {
                let mut exclusive = false;
                let result = self.session(&mut card, reader, &mut exclusive);
                release(&mut card, exclusive);
                result
            }
            Err(error) => Err((Stage::Setup, error)),
        };

        match result {
            Ok(tolerated) => Ok(ReaderOutcome::Completed { tolerated }),
            Err((stage, error)) => match classify(&error, &self.config.options, stage) {
                Verdict::Abort => Err(error),
                Verdict::SkipReader | Verdict::Continue => Ok(ReaderOutcome::Skipped(error)),
            },
        }
    }

    fn session<C>(
        &mut self,
        card: &mut C,
        reader: &str,
        exclusive: &mut bool,
    ) -> std::result::Result<Vec<Error>, Failure>
    where
        C: CardManager,
    {
        let config = self.config;
        let request = &config.request;
        let options = &config.options;
        let setup = |error: Error| (Stage::Setup, error);

        card.begin_exclusive().map_err(setup)?;
        *exclusive = true;

        if request.info {
            dispatch::reader_info(card, reader, self.reporter).map_err(setup)?;
        }
        for apdu in &request.raw_apdus {
            dispatch::raw_apdu(card, apdu, self.reporter).map_err(setup)?;
        }

        let domain = card.select_domain(options.domain.as_ref()).map_err(setup)?;
        debug!(aid = ?domain.aid, "domain selected");

        if request.info {
            dispatch::card_info(card, self.reporter).map_err(setup)?;
        }

        gate::check(card, &config.keys, options, self.reporter).map_err(setup)?;

        let verbs = dispatch::plan(request);
        if verbs.is_empty() {
            return Ok(Vec::new());
        }

        card.open_secure_channel(&config.keys, options.scp_version, options.mode)
            .map_err(setup)?;

        let mut tolerated = Vec::new();
        let mut dispatcher = Dispatcher::new(&config.keys, options, self.reporter);
        for verb in &verbs {
            if let Err(error) = dispatcher.run(card, verb) {
                match classify(&error, options, Stage::Dispatch) {
                    Verdict::Continue => {
                        warn!(%verb, %error, "continuing after error");
                        tolerated.push(error);
                    }
                    Verdict::SkipReader | Verdict::Abort => return Err((Stage::Dispatch, error)),
                }
            }
        }

        Ok(tolerated)
    }
}

/// End exclusive access and disconnect, logging what fails
fn release<C: CardManager>(card: &mut C, exclusive: bool) {
    if exclusive {
        if let Err(error) = card.end_exclusive() {
            debug!(%error, "failed to end exclusive access");
        }
    }
    if let Err(error) = card.disconnect() {
        debug!(%error, "failed to disconnect");
    }
}
