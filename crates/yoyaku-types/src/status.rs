use serde::{Deserialize, Serialize};

/// Reservation lifecycle. All legality checks live in
/// [`ReservationStatus::can_transition_to`] so new triggers (webhook replies,
/// portal actions, staff actions) cannot bypass them with scattered
/// conditionals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Scheduled,
    VisitPlanned,
    ChangeRequested,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Scheduled => "scheduled",
            ReservationStatus::VisitPlanned => "visit_planned",
            ReservationStatus::ChangeRequested => "change_requested",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<ReservationStatus> {
        match s {
            "scheduled" => Some(ReservationStatus::Scheduled),
            "visit_planned" => Some(ReservationStatus::VisitPlanned),
            "change_requested" => Some(ReservationStatus::ChangeRequested),
            "cancelled" => Some(ReservationStatus::Cancelled),
            "completed" => Some(ReservationStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled | ReservationStatus::Completed)
    }

    /// Reservations in these states are still "live": they can be reminded
    /// and they occupy their time slot.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Scheduled | ReservationStatus::VisitPlanned)
    }

    pub fn can_transition_to(&self, to: ReservationStatus) -> bool {
        use ReservationStatus::*;
        match (self, to) {
            (Scheduled, VisitPlanned) => true,
            (Scheduled, ChangeRequested) => true,
            (Scheduled | VisitPlanned | ChangeRequested, Cancelled) => true,
            (Scheduled | VisitPlanned | ChangeRequested, Completed) => true,
            _ => false,
        }
    }
}

/// A customer's postback reply to the 7-day reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderReply {
    Visit,
    Change,
    Cancel,
}

impl ReminderReply {
    pub fn parse(s: &str) -> Option<ReminderReply> {
        match s {
            "visit" => Some(ReminderReply::Visit),
            "change" => Some(ReminderReply::Change),
            "cancel" => Some(ReminderReply::Cancel),
            _ => None,
        }
    }
}

/// What the webhook should do with a reminder reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDecision {
    /// Apply the transition, then acknowledge.
    Transition(ReservationStatus),
    /// The requested state already holds. Acknowledge without mutating, so
    /// duplicate webhook deliveries are absorbed.
    AlreadySatisfied,
    /// Changes and cancellations are handled through the customer portal,
    /// never through the messaging channel. Reply with guidance only.
    PortalOnly,
    /// The reservation is in a state where the reply makes no sense.
    NotAllowed,
}

/// Central decision table for messaging-channel replies.
pub fn decide_reply(current: ReservationStatus, reply: ReminderReply) -> ReplyDecision {
    match reply {
        ReminderReply::Visit => match current {
            ReservationStatus::Scheduled => ReplyDecision::Transition(ReservationStatus::VisitPlanned),
            ReservationStatus::VisitPlanned => ReplyDecision::AlreadySatisfied,
            _ => ReplyDecision::NotAllowed,
        },
        ReminderReply::Change | ReminderReply::Cancel => ReplyDecision::PortalOnly,
    }
}

/// Link sub-state of a reservation's QR flow. `Linked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Pending,
    Linked,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Pending => "pending",
            LinkStatus::Linked => "linked",
        }
    }

    pub fn parse(s: &str) -> Option<LinkStatus> {
        match s {
            "pending" => Some(LinkStatus::Pending),
            "linked" => Some(LinkStatus::Linked),
            _ => None,
        }
    }
}
