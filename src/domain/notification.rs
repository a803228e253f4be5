use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Membership,
    Commission,
    Payout,
    Affiliate,
    StoreCredit,
    Advertisement,
    Broadcast,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Membership => "membership",
            NotificationKind::Commission => "commission",
            NotificationKind::Payout => "payout",
            NotificationKind::Affiliate => "affiliate",
            NotificationKind::StoreCredit => "store_credit",
            NotificationKind::Advertisement => "advertisement",
            NotificationKind::Broadcast => "broadcast",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "membership" => NotificationKind::Membership,
            "commission" => NotificationKind::Commission,
            "payout" => NotificationKind::Payout,
            "affiliate" => NotificationKind::Affiliate,
            "store_credit" => NotificationKind::StoreCredit,
            "advertisement" => NotificationKind::Advertisement,
            _ => NotificationKind::Broadcast,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

impl NewNotification {
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            title: title.into(),
            body: body.into(),
        }
    }
}
