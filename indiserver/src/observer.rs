//! Driver-to-driver property subscriptions.
//!
//! A driver asks to watch another driver's property by sending
//!
//! ```xml
//! <propertyVectorSubscribtion device='Mount' name='EQUATORIAL_EOD_COORD'
//!     action='subscribe' notification='State'/>
//! ```
//!
//! and from then on receives copies of that property's `def*`, `set*` and
//! `delProperty` traffic. `unsubscribe` with the same device and name stops
//! it. The spelling of the tag is part of the wire protocol.

use std::fmt;
use std::str::FromStr;

use indi_xml::Element;

use crate::error::ProtocolError;
use crate::registry::DriverId;

/// Control tag drivers use to manage subscriptions.
pub const SUBSCRIPTION_TAG: &str = "propertyVectorSubscribtion";

/// Tag of the alert sent when a watched device's driver dies.
pub const ALERT_TAG: &str = "subscribtionAlert";

/// How much change a subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notification {
    /// Only when the vector's values change
    Value,
    /// Only when the vector's `state` changes
    State,
    /// Every update
    #[default]
    All,
}

impl FromStr for Notification {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "value" => Ok(Notification::Value),
            "state" => Ok(Notification::State),
            "all" => Ok(Notification::All),
            other => Err(format!("unknown notification '{other}'")),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Notification::Value => "Value",
            Notification::State => "State",
            Notification::All => "All",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// A parsed `propertyVectorSubscribtion` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub device: String,
    pub name: String,
    pub action: SubscriptionAction,
    pub notification: Notification,
}

impl SubscriptionRequest {
    pub fn from_element(element: &Element) -> Result<Self, ProtocolError> {
        let required = |attr: &'static str| {
            element
                .attr(attr)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(ProtocolError::MissingAttribute {
                    tag: SUBSCRIPTION_TAG,
                    attribute: attr,
                })
        };

        let device = required("device")?;
        let name = required("name")?;
        let action = match required("action")?.as_str() {
            "subscribe" => SubscriptionAction::Subscribe,
            "unsubscribe" => SubscriptionAction::Unsubscribe,
            other => {
                return Err(ProtocolError::InvalidValue {
                    tag: SUBSCRIPTION_TAG,
                    value: other.to_string(),
                })
            }
        };
        let notification = match element.attr("notification") {
            Some(value) => value.parse().map_err(|_| ProtocolError::InvalidValue {
                tag: SUBSCRIPTION_TAG,
                value: value.to_string(),
            })?,
            None => Notification::default(),
        };

        Ok(Self {
            device,
            name,
            action,
            notification,
        })
    }
}

/// One driver watching one property of one device.
#[derive(Debug, Clone)]
pub struct Subscription {
    owner: DriverId,
    device: String,
    name: String,
    notification: Notification,
    last_state: Option<String>,
    last_values: Option<Vec<Element>>,
}

impl Subscription {
    pub fn new(owner: DriverId, device: &str, name: &str, notification: Notification) -> Self {
        Self {
            owner,
            device: device.to_string(),
            name: name.to_string(),
            notification,
            last_state: None,
            last_values: None,
        }
    }

    pub fn owner(&self) -> DriverId {
        self.owner
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn notification(&self) -> Notification {
        self.notification
    }

    fn matches(&self, device: &str, name: Option<&str>) -> bool {
        self.device == device && name.map_or(true, |n| n == self.name)
    }

    /// Decide whether `element` should reach the owner, updating the
    /// remembered baseline.
    ///
    /// `set*` updates are edge-triggered for `State` and `Value`; definitions
    /// and deletions always pass and restart the baseline.
    pub fn should_notify(&mut self, element: &Element) -> bool {
        let tag = element.tag();

        if tag == "delProperty" {
            self.last_state = None;
            self.last_values = None;
            return true;
        }

        if tag.starts_with("def") {
            self.last_state = element.attr("state").map(str::to_string);
            self.last_values = Some(element.children().to_vec());
            return true;
        }

        if !tag.starts_with("set") {
            return false;
        }

        match self.notification {
            Notification::All => true,
            Notification::State => {
                let state = element.attr("state");
                if state.is_some() && self.last_state.as_deref() == state {
                    return false;
                }
                self.last_state = state.map(str::to_string);
                true
            }
            Notification::Value => {
                let values = element.children();
                if self.last_values.as_deref() == Some(values) {
                    return false;
                }
                self.last_values = Some(values.to_vec());
                true
            }
        }
    }
}

/// Every active subscription, at most one per (owner, device, name).
#[derive(Debug, Default)]
pub struct ObserverRegistry {
    subscriptions: Vec<Subscription>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Returns false if an identical one already exists.
    pub fn subscribe(
        &mut self,
        owner: DriverId,
        device: &str,
        name: &str,
        notification: Notification,
    ) -> bool {
        if self.position(owner, device, name).is_some() {
            return false;
        }
        self.subscriptions
            .push(Subscription::new(owner, device, name, notification));
        true
    }

    pub fn unsubscribe(&mut self, owner: DriverId, device: &str, name: &str) -> bool {
        match self.position(owner, device, name) {
            Some(index) => {
                self.subscriptions.remove(index);
                true
            }
            None => false,
        }
    }

    /// Apply a parsed control request from `owner`. Returns whether anything changed.
    pub fn apply(&mut self, owner: DriverId, request: &SubscriptionRequest) -> bool {
        match request.action {
            SubscriptionAction::Subscribe => {
                self.subscribe(owner, &request.device, &request.name, request.notification)
            }
            SubscriptionAction::Unsubscribe => {
                self.unsubscribe(owner, &request.device, &request.name)
            }
        }
    }

    /// Drop everything `owner` subscribed to. Returns how many were dropped.
    pub fn remove_owner(&mut self, owner: DriverId) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.owner != owner);
        before - self.subscriptions.len()
    }

    /// Owners that should receive `element`, which concerns `device`.
    ///
    /// `sender` never hears about its own traffic. A `delProperty` without a
    /// name matches every subscription on the device.
    pub fn notify_targets(
        &mut self,
        sender: Option<DriverId>,
        device: &str,
        element: &Element,
    ) -> Vec<DriverId> {
        let name = element.attr("name");
        let mut owners: Vec<DriverId> = Vec::new();

        for subscription in &mut self.subscriptions {
            if Some(subscription.owner) == sender || !subscription.matches(device, name) {
                continue;
            }
            if subscription.should_notify(element) && !owners.contains(&subscription.owner) {
                owners.push(subscription.owner);
            }
        }

        owners
    }

    /// Subscriptions by other drivers that watch `device`.
    pub fn watchers_of(&self, device: &str, except: DriverId) -> Vec<(DriverId, String)> {
        self.subscriptions
            .iter()
            .filter(|s| s.device == device && s.owner != except)
            .map(|s| (s.owner, s.name.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn position(&self, owner: DriverId, device: &str, name: &str) -> Option<usize> {
        self.subscriptions
            .iter()
            .position(|s| s.owner == owner && s.device == device && s.name == name)
    }
}

/// Build the alert a watcher gets when `device`'s driver dies.
pub fn died_alert(device: &str, name: &str) -> Element {
    Element::new(ALERT_TAG)
        .with_attr("device", device)
        .with_attr("name", name)
        .with_attr("alert", "died")
}
