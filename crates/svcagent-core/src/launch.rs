//! Launch protocol: events from the process launcher and the transport
//! seam used to talk back to it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use svcagent_runloop::{LoopHandle, RunLoopResult};

use crate::dispatch::CoreEvent;
use crate::error::SubscriptionError;

/// Bundle key marking an application as allowed to stay in the background.
pub const BACKGROUND_ALLOWED_KEY: &str = "__K_ALLOWED_BG__";

/// Value of [`BACKGROUND_ALLOWED_KEY`] granting the exemption.
pub const BACKGROUND_ALLOWED_VALUE: &str = "ALLOWED_BG";

/// Launch-protocol event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchEventKind {
    Start,
    Resume,
    Suspend,
    Wake,
    Terminate,
    TerminateBackgroundApp,
}

impl LaunchEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LaunchEventKind::Start => "start",
            LaunchEventKind::Resume => "resume",
            LaunchEventKind::Suspend => "suspend",
            LaunchEventKind::Wake => "wake",
            LaunchEventKind::Terminate => "terminate",
            LaunchEventKind::TerminateBackgroundApp => "terminate_background_app",
        }
    }

    /// Whether this event ends the process.
    pub fn is_terminate(self) -> bool {
        matches!(
            self,
            LaunchEventKind::Terminate | LaunchEventKind::TerminateBackgroundApp
        )
    }
}

impl fmt::Display for LaunchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat string-keyed launch payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle(BTreeMap<String, String>);

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the launcher granted the background exemption.
    pub fn background_allowed(&self) -> bool {
        self.get(BACKGROUND_ALLOWED_KEY) == Some(BACKGROUND_ALLOWED_VALUE)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Bundle {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One launch-protocol event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchEvent {
    pub kind: LaunchEventKind,
    #[serde(default)]
    pub bundle: Bundle,
}

impl LaunchEvent {
    pub fn new(kind: LaunchEventKind) -> Self {
        Self {
            kind,
            bundle: Bundle::new(),
        }
    }

    pub fn with_bundle(kind: LaunchEventKind, bundle: Bundle) -> Self {
        Self { kind, bundle }
    }
}

/// Status reported back to the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Launching,
    Running,
    Dying,
}

/// Posts launch events into the agent's loop. Cloneable and `Send`.
#[derive(Debug, Clone)]
pub struct LaunchSink {
    handle: LoopHandle<CoreEvent>,
}

impl LaunchSink {
    pub(crate) fn new(handle: LoopHandle<CoreEvent>) -> Self {
        Self { handle }
    }

    /// Deliver an event. Fails once the loop is gone.
    pub fn deliver(&self, event: LaunchEvent) -> RunLoopResult<()> {
        self.handle.post(CoreEvent::Launch(event))
    }
}

/// Process-launch transport.
pub trait LaunchTransport {
    /// Bind to the launcher, forwarding the process argv. Events arrive on
    /// `sink` from then on.
    fn bind(&mut self, argv: &[String], sink: LaunchSink) -> Result<(), SubscriptionError>;

    /// Report the process status.
    fn update_status(&mut self, status: AppStatus) -> Result<(), SubscriptionError>;

    /// Ask the supervisor not to restart this process after it exits.
    fn inform_no_restart(&mut self) -> Result<(), SubscriptionError>;
}
