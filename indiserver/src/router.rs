//! Fan-out of parsed elements to connection queues.
//!
//! Each function decides which queues of one category (drivers, clients,
//! observing drivers) want an element and pushes a shared [`Message`] onto
//! them. The message is built lazily on the first recipient, so an element
//! nobody wants is never serialized. Passing the returned message into the
//! next routing call lets several categories share one broadcast.

use std::sync::Arc;

use indi_xml::Element;
use tracing::{debug, warn};

use crate::client::is_blob_tag;
use crate::message::{Message, MessageQueue};
use crate::observer::{SubscriptionRequest, SUBSCRIPTION_TAG};
use crate::registry::{ClientId, DriverId, Registry};

/// Result of one fan-out.
#[derive(Debug, Default)]
pub struct Delivery {
    message: Option<Arc<Message>>,
    recipients: usize,
}

impl Delivery {
    /// Continue a broadcast that may already have a message.
    pub fn new(existing: Option<Arc<Message>>) -> Self {
        Self {
            message: existing,
            recipients: 0,
        }
    }

    fn deliver(&mut self, queue: &MessageQueue, element: &Element) {
        let message = self
            .message
            .get_or_insert_with(|| Message::new(element.clone()));
        queue.push(Arc::clone(message));
        self.recipients += 1;
    }

    /// Queues that received the element in this call.
    pub fn recipients(&self) -> usize {
        self.recipients
    }

    pub fn is_wanted(&self) -> bool {
        self.recipients > 0
    }

    /// The shared message, if any call in the broadcast built one.
    pub fn message(&self) -> Option<&Arc<Message>> {
        self.message.as_ref()
    }

    pub fn into_message(self) -> Option<Arc<Message>> {
        self.message
    }
}

/// What the observer pass did with a driver's element.
#[derive(Debug)]
pub enum ObserverRoute {
    /// A subscription control element; it goes nowhere else
    Consumed,
    /// Routing continues with this delivery
    Forward(Delivery),
}

fn non_empty(device: Option<&str>) -> Option<&str> {
    device.filter(|d| !d.is_empty())
}

/// Queue a client's element for drivers.
///
/// With a device, only the driver owning it (and drivers that have not yet
/// learned their device) receive it. Without one, every driver receives it,
/// and each driver with a known device gets its own copy naming that device
/// so chained servers only forward what they own.
pub fn route_to_drivers(
    registry: &Registry,
    element: &Element,
    device: Option<&str>,
    existing: Option<Arc<Message>>,
) -> Delivery {
    let mut delivery = Delivery::new(existing);
    let device = non_empty(device);

    for (_, driver) in registry.drivers().filter(|(_, d)| d.is_running()) {
        match (device, driver.device()) {
            (Some(wanted), Some(owned)) if wanted != owned => {}
            (None, Some(owned)) => {
                let mut addressed = element.clone();
                addressed.set_attr("device", owned);
                driver.queue().push(Message::new(addressed));
                delivery.recipients += 1;
            }
            _ => delivery.deliver(driver.queue(), element),
        }
    }

    delivery
}

/// Queue an element for every client that wants it.
///
/// A client must have sent `getProperties`, be interested in `device`, and
/// accept this kind of traffic under its BLOB policy. `exclude` never
/// receives it.
pub fn route_to_clients(
    registry: &Registry,
    exclude: Option<ClientId>,
    element: &Element,
    device: Option<&str>,
    existing: Option<Arc<Message>>,
) -> Delivery {
    let mut delivery = Delivery::new(existing);
    let device = non_empty(device);
    let is_blob = is_blob_tag(element.tag());

    for (id, client) in registry.clients() {
        if Some(id) == exclude
            || !client.is_announced()
            || !client.is_interested(device)
            || !client.blob_policy().admits(is_blob)
        {
            continue;
        }
        delivery.deliver(client.queue(), element);
    }

    delivery
}

/// Handle a driver's element on behalf of observing drivers.
///
/// Subscription control elements are applied and consumed. Property
/// traffic is copied to drivers subscribed to it; plain `message`
/// elements are not observed.
pub fn route_to_observers(
    registry: &mut Registry,
    sender: DriverId,
    element: &Element,
    device: Option<&str>,
    existing: Option<Arc<Message>>,
) -> ObserverRoute {
    if element.tag() == SUBSCRIPTION_TAG {
        match SubscriptionRequest::from_element(element) {
            Ok(request) => {
                let changed = registry.observers_mut().apply(sender, &request);
                debug!(
                    "{sender}: {:?} {}.{} ({}){}",
                    request.action,
                    request.device,
                    request.name,
                    request.notification,
                    if changed { "" } else { " ignored" }
                );
            }
            Err(e) => warn!("{sender}: {e}"),
        }
        return ObserverRoute::Consumed;
    }

    let mut delivery = Delivery::new(existing);
    let Some(device) = non_empty(device) else {
        return ObserverRoute::Forward(delivery);
    };
    if element.tag() == "message" {
        return ObserverRoute::Forward(delivery);
    }

    let owners = registry
        .observers_mut()
        .notify_targets(Some(sender), device, element);
    for owner in owners {
        match registry.driver(owner) {
            Ok(driver) if driver.is_running() => delivery.deliver(driver.queue(), element),
            Ok(_) => {}
            Err(e) => debug!("observer: {e}"),
        }
    }

    ObserverRoute::Forward(delivery)
}
