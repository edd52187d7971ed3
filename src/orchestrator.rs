//! MAC address change workflow.
//!
//! [`MacChanger::change_mac_address`] drives the whole sequence against one
//! interface:
//!
//! 1. check that an elevated shell can be obtained,
//! 2. check that the interface is listed by `ip link show`,
//! 3. record the interface state before the change,
//! 4. bring the link down, set the address, bring the link up,
//! 5. restart wifi (or mobile data) so the device reconnects,
//! 6. read the address back from `ip link show <interface>`.
//!
//! The first failing step ends the sequence. Whatever happens, the caller gets
//! a [`Report`] whose [`Report::message`] is a human readable status line;
//! nothing is propagated as an error.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::command::{CommandError, CommandResult, PrivilegedRunner};
use crate::mac::{find_link_ether, MacAddress};
use crate::pause::Pause;

/// Lowercase words whose presence in the output of a link command is taken
/// as a failure of that command.
///
/// This is plain text sniffing: a successful command printing one of these
/// words would be reported as rejected, and a failing one printing none of
/// them goes unnoticed. `ip` gives no better signal once run through `su`.
pub const REJECTION_MARKERS: [&str; 3] = ["error", "cannot", "not permitted"];

/// Message reported when the address was changed and read back.
pub const SUCCESS_MESSAGE: &str = "MAC address changed successfully.";

/// Steps of the workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// Probe for an elevated shell
    CheckRoot,
    /// List interfaces
    Discover,
    /// Record the state before the change
    Inspect,
    /// Link down, address change, link up
    Apply,
    /// Restart the network service
    Reconnect,
    /// Read back the address
    Verify,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::CheckRoot => "check-root",
            Step::Discover => "discover",
            Step::Inspect => "inspect",
            Step::Apply => "apply",
            Step::Reconnect => "reconnect",
            Step::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// Settling delays of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    /// Wait after each of the three link commands.
    pub settle: Duration,
    /// Wait after restarting the network service.
    pub reconnect: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            reconnect: Duration::from_millis(2000),
        }
    }
}

/// Workflow result when every command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The address read back after the change.
    Changed {
        /// observed address
        mac: MacAddress,
    },
    /// Every command went through but no address could be read back.
    Unconfirmed {
        /// raw output of the verification query
        query: String,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Changed { mac } => write!(f, "{SUCCESS_MESSAGE}\n\nCurrent MAC: {mac}"),
            Outcome::Unconfirmed { query } => write!(
                f,
                "MAC address change attempted, but failed to retrieve current MAC:\n\n{query}"
            ),
        }
    }
}

#[derive(Debug, Error)]
/// Reasons for which the workflow stopped early.
pub enum ChangeError {
    /// No elevated shell could be obtained.
    #[error("Root access not available.")]
    RootUnavailable,
    /// The interface is not in the `ip link show` listing.
    #[error("Interface {interface} not found. Available interfaces: {listing}")]
    InterfaceNotFound {
        /// requested interface
        interface: String,
        /// full `ip link show` output
        listing: String,
    },
    /// A link command printed one of the [`REJECTION_MARKERS`].
    #[error("Failed to change MAC address: '{command}': {output}")]
    CommandRejected {
        /// offending command
        command: String,
        /// what it printed
        output: String,
    },
    /// A command could not be run at all.
    #[error("Failed to {action}: {source}")]
    ExecutionFault {
        /// step during which it happened
        step: Step,
        /// what was being done, e.g. `check interfaces`
        action: String,
        /// underlying fault
        #[source]
        source: CommandError,
    },
    /// The address change went through but the restart command could not run.
    #[error("MAC address changed, but failed to restart network: {source}")]
    RestartFailed {
        /// underlying fault
        #[source]
        source: CommandError,
    },
}

impl ChangeError {
    /// Step at which the workflow stopped.
    pub fn step(&self) -> Step {
        match self {
            ChangeError::RootUnavailable => Step::CheckRoot,
            ChangeError::InterfaceNotFound { .. } => Step::Discover,
            ChangeError::CommandRejected { .. } => Step::Apply,
            ChangeError::ExecutionFault { step, .. } => *step,
            ChangeError::RestartFailed { .. } => Step::Reconnect,
        }
    }
}

/// Machine readable status of a [`Report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[allow(missing_docs)]
    Changed,
    #[allow(missing_docs)]
    Unconfirmed,
    #[allow(missing_docs)]
    RootUnavailable,
    #[allow(missing_docs)]
    InterfaceNotFound,
    #[allow(missing_docs)]
    CommandRejected,
    #[allow(missing_docs)]
    ExecutionFault,
    #[allow(missing_docs)]
    RestartFailed,
}

/// Serializable view of a [`Report`], used for `--json` output.
#[derive(Debug, Serialize)]
pub struct ReportSummary<'a> {
    /// status
    pub status: Status,
    /// human readable report
    pub message: String,
    /// step at which the workflow stopped, if it stopped early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<Step>,
    /// address read back after the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<&'a MacAddress>,
    /// link command whose output was taken as a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<&'a str>,
}

/// Final result of one workflow run.
#[derive(Debug)]
pub struct Report {
    result: Result<Outcome, ChangeError>,
}

impl Report {
    /// Underlying result.
    pub fn result(&self) -> &Result<Outcome, ChangeError> {
        &self.result
    }

    /// Consume the report and return the underlying result.
    pub fn into_result(self) -> Result<Outcome, ChangeError> {
        self.result
    }

    /// Text shown to the user.
    pub fn message(&self) -> String {
        match &self.result {
            Ok(outcome) => outcome.to_string(),
            Err(e) => e.to_string(),
        }
    }

    /// `true` only when the new address was read back.
    pub fn is_success(&self) -> bool {
        matches!(self.result, Ok(Outcome::Changed { .. }))
    }

    /// Machine readable status.
    pub fn status(&self) -> Status {
        match &self.result {
            Ok(Outcome::Changed { .. }) => Status::Changed,
            Ok(Outcome::Unconfirmed { .. }) => Status::Unconfirmed,
            Err(ChangeError::RootUnavailable) => Status::RootUnavailable,
            Err(ChangeError::InterfaceNotFound { .. }) => Status::InterfaceNotFound,
            Err(ChangeError::CommandRejected { .. }) => Status::CommandRejected,
            Err(ChangeError::ExecutionFault { .. }) => Status::ExecutionFault,
            Err(ChangeError::RestartFailed { .. }) => Status::RestartFailed,
        }
    }

    /// Process exit code: 0 when changed, 2 when unconfirmed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.status() {
            Status::Changed => 0,
            Status::Unconfirmed => 2,
            _ => 1,
        }
    }

    /// Serializable summary of the report.
    pub fn summary(&self) -> ReportSummary<'_> {
        ReportSummary {
            status: self.status(),
            message: self.message(),
            failed_step: self.result.as_ref().err().map(ChangeError::step),
            mac: match &self.result {
                Ok(Outcome::Changed { mac }) => Some(mac),
                _ => None,
            },
            command: match &self.result {
                Err(ChangeError::CommandRejected { command, .. }) => Some(command.as_str()),
                _ => None,
            },
        }
    }
}

impl From<Result<Outcome, ChangeError>> for Report {
    fn from(result: Result<Outcome, ChangeError>) -> Self {
        Self { result }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Return the first rejection marker found in `output`, ignoring case.
pub fn rejection_marker(output: &str) -> Option<&'static str> {
    let output = output.to_lowercase();
    REJECTION_MARKERS
        .iter()
        .copied()
        .find(|marker| output.contains(marker))
}

/// Command restarting the network service the interface belongs to.
///
/// Interfaces named like `wlan*` are wifi, anything else is assumed to be
/// mobile data.
pub fn restart_command(interface: &str) -> &'static str {
    if interface.contains("wlan") {
        "svc wifi disable && svc wifi enable"
    } else {
        "svc data disable && svc data enable"
    }
}

/// The three link commands, in the order they must run.
///
/// Both values are quoted for the shell, a requested address such as
/// `00:11; reboot` reaches `ip` as a single argument.
pub fn link_commands(interface: &str, new_mac: &str) -> [String; 3] {
    let interface = shell_words::quote(interface);
    let new_mac = shell_words::quote(new_mac);
    [
        format!("ip link set {interface} down"),
        format!("ip link set {interface} address {new_mac}"),
        format!("ip link set {interface} up"),
    ]
}

/// Command describing one interface.
pub fn link_show_command(interface: &str) -> String {
    format!("ip link show {}", shell_words::quote(interface))
}

/// Drive the MAC change workflow through a [`PrivilegedRunner`].
pub struct MacChanger<R, P> {
    runner: R,
    pause: P,
    delays: Delays,
}

impl<R: PrivilegedRunner, P: Pause> MacChanger<R, P> {
    /// Create a changer.
    pub fn new(runner: R, pause: P, delays: Delays) -> Self {
        Self {
            runner,
            pause,
            delays,
        }
    }

    /// Change the address of `interface` to `new_mac` and read it back.
    ///
    /// `new_mac` is passed to `ip` as is; invalid addresses are left for the
    /// kernel to refuse.
    pub fn change_mac_address(&self, interface: &str, new_mac: &str) -> Report {
        info!(interface, new_mac, "Starting MAC address change");
        let result = self.run_steps(interface, new_mac);
        match &result {
            Ok(Outcome::Changed { mac }) => info!(%mac, "MAC address changed"),
            Ok(Outcome::Unconfirmed { query }) => {
                error!("Failed to retrieve current MAC. Query output: {}", query)
            }
            Err(e) => error!(step = %e.step(), "{}", e),
        }
        result.into()
    }

    fn run_steps(&self, interface: &str, new_mac: &str) -> Result<Outcome, ChangeError> {
        self.check_root()?;
        self.discover(interface)?;
        self.inspect(interface)?;
        self.apply(interface, new_mac)?;
        self.reconnect(interface)?;
        self.verify(interface)
    }

    fn exec(&self, step: Step, action: &str, command: &str) -> Result<CommandResult, ChangeError> {
        debug!(%step, command, "Executing command");
        let res = self
            .runner
            .run(command)
            .map_err(|source| ChangeError::ExecutionFault {
                step,
                action: action.to_owned(),
                source,
            })?;
        debug!(%step, command, exit_status = ?res.exit_status, "Command output: {}", res.output);
        Ok(res)
    }

    fn check_root(&self) -> Result<(), ChangeError> {
        if !self.runner.is_available() {
            return Err(ChangeError::RootUnavailable);
        }
        debug!("Root access confirmed");
        Ok(())
    }

    fn discover(&self, interface: &str) -> Result<(), ChangeError> {
        let listing = self.exec(Step::Discover, "check interfaces", "ip link show")?;
        if !listing.output.contains(interface) {
            return Err(ChangeError::InterfaceNotFound {
                interface: interface.to_owned(),
                listing: listing.output,
            });
        }
        Ok(())
    }

    fn inspect(&self, interface: &str) -> Result<(), ChangeError> {
        let state = self.exec(
            Step::Inspect,
            "check initial state",
            &link_show_command(interface),
        )?;
        match find_link_ether(&state.output) {
            Some(mac) => info!(interface, %mac, "Current MAC before change"),
            None => debug!(interface, "No MAC address in initial state"),
        }
        Ok(())
    }

    fn apply(&self, interface: &str, new_mac: &str) -> Result<(), ChangeError> {
        for command in link_commands(interface, new_mac) {
            let res = self.exec(
                Step::Apply,
                &format!("execute command '{command}'"),
                &command,
            )?;
            if let Some(marker) = rejection_marker(&res.output) {
                warn!(command = %command, marker, "Command output looks like a failure");
                return Err(ChangeError::CommandRejected {
                    command,
                    output: res.output,
                });
            }
            if !res.succeeded() {
                // Only the printed text decides, the shell status is informative.
                warn!(command = %command, exit_status = ?res.exit_status, "Non zero exit status");
            }
            self.pause.pause(self.delays.settle);
        }
        Ok(())
    }

    fn reconnect(&self, interface: &str) -> Result<(), ChangeError> {
        let command = restart_command(interface);
        info!(command, "Restarting network service to reconnect");
        let res = self
            .runner
            .run(command)
            .map_err(|source| ChangeError::RestartFailed { source })?;
        debug!(
            step = %Step::Reconnect,
            command,
            exit_status = ?res.exit_status,
            "Command output: {}",
            res.output
        );
        self.pause.pause(self.delays.reconnect);
        Ok(())
    }

    fn verify(&self, interface: &str) -> Result<Outcome, ChangeError> {
        let query = self.exec(
            Step::Verify,
            "query MAC address",
            &link_show_command(interface),
        )?;
        Ok(match find_link_ether(&query.output) {
            Some(mac) => Outcome::Changed { mac },
            None => Outcome::Unconfirmed {
                query: query.output,
            },
        })
    }
}
