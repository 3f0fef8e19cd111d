/**
 * CLUSTERDASH - Couche de corrélation et de réconciliation du dashboard
 *
 * RÔLE : Garder une vue locale cohérente du cluster (nodes, kernels,
 * workloads, presets) alimentée par une connexion WebSocket partagée et par
 * du polling HTTP concurrent.
 *
 * ARCHITECTURE :
 * - correlation + dispatch : réponses corrélées par msg_id, puis broadcasts par op
 * - guard + polling + store : seul le dernier cycle émis peut committer
 * - reconciler : compteurs de créations optimistes
 * - session : contexte injecté qui relie le tout
 */

pub mod config;
pub mod connection;
pub mod correlation;
pub mod dispatch;
pub mod gateway;
pub mod guard;
pub mod health;
pub mod http;
pub mod logs;
pub mod models;
pub mod notify;
pub mod polling;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod store;

pub use correlation::{Completion, CorrelationTable};
pub use dispatch::{BroadcastRegistry, DispatchOutcome, Dispatcher};
pub use guard::{CycleTicket, GuardSet};
pub use models::{Listing, ResourceClass};
pub use polling::{CycleOutcome, FetchError, Fetcher, PollingScheduler};
pub use reconciler::{CreationKind, Reconciler};
pub use session::{DashboardSession, SessionError, SessionOptions};
pub use store::ResourceStore;
