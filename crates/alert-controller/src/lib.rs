/*
 * 5D Labs Agent Platform - Alert Controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Alert controller core library
//!
//! Compiles `ClusterAlert`/`ProjectAlert` rules and `Notifier` channels into
//! Alertmanager routing configuration, and keeps each rule's recorded state in
//! step with the alerts and silences Alertmanager reports at runtime.

pub mod alertmanager;
pub mod crds;
pub mod tasks;

// Re-export commonly used types
pub use alertmanager::{AlertEngine, AlertmanagerClient, AlertmanagerConfig};
pub use crds::{AlertState, ClusterAlert, Notifier, ProjectAlert};
pub use tasks::config::ControllerConfig;
pub use tasks::rule::{AlertIdentity, AlertRule, NotifierChannel};
pub use tasks::types::{Error, Result};
