//! User-editable dashboard preferences (`GET/POST /api/settings`).

use serde::{Deserialize, Serialize};

/// Preferences shown on the dashboard settings page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardSettings {
    /// Model type preselected in the training form.
    pub default_model: String,
    /// Training timeout in minutes.
    pub training_timeout: u32,
    /// Validate uploads automatically.
    pub auto_validation: bool,
    /// Notify on training events.
    pub training_notifications: bool,
    /// Notify on errors.
    pub error_notifications: bool,
    /// Notification address.
    pub email_address: String,
    /// Days before uploaded data is cleaned up.
    pub data_cleanup: u32,
    /// Maximum upload size in megabytes.
    pub max_file_size: u32,
    /// Show technical details in the UI.
    pub show_technical: bool,
    /// Enable debug mode in the UI.
    pub debug_mode: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            default_model: "random_forest".to_string(),
            training_timeout: 15,
            auto_validation: true,
            training_notifications: true,
            error_notifications: true,
            email_address: String::new(),
            data_cleanup: 30,
            max_file_size: 50,
            show_technical: false,
            debug_mode: false,
        }
    }
}
