//! Command routing from classified messages to send requests

use std::collections::HashMap;

use tracing::debug;

use crate::config::RouteConfig;
use crate::request::{RequestIds, RequestOrigin, SendRequest};
use crate::types::{Message, PeripheralAddress};

/// Destination of one command category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target: PeripheralAddress,
    pub payload: Vec<u8>,
}

/// Static category -> (target, payload) table
#[derive(Debug, Clone)]
pub struct CommandRouter {
    routes: HashMap<String, Route>,
    ids: RequestIds,
}

impl CommandRouter {
    /// Build the table from configuration, later entries override earlier ones
    pub fn new(routes: &[RouteConfig], ids: RequestIds) -> Self {
        let routes = routes
            .iter()
            .map(|r| {
                (
                    r.category.clone(),
                    Route {
                        target: r.target,
                        payload: r.payload.as_bytes().to_vec(),
                    },
                )
            })
            .collect();
        Self { routes, ids }
    }

    /// Look up the route for a category
    pub fn route_for(&self, category: &str) -> Option<&Route> {
        self.routes.get(category)
    }

    /// Map a message to at most one send request
    pub fn route(&self, message: &Message) -> Option<SendRequest> {
        let category = message.classification()?;
        let Some(route) = self.routes.get(category) else {
            debug!("No route for category '{}'", category);
            return None;
        };

        Some(SendRequest::new(
            self.ids.next_id(),
            route.target,
            route.payload.clone(),
            RequestOrigin::Routed {
                category: category.to_string(),
            },
        ))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandToken;
    use crate::decoder::NotificationDecoder;

    fn listener() -> PeripheralAddress {
        "50:F1:4A:4D:DC:E9".parse().unwrap()
    }

    fn sender() -> PeripheralAddress {
        "5C:F8:21:9E:55:84".parse().unwrap()
    }

    fn router() -> CommandRouter {
        CommandRouter::new(
            &[
                RouteConfig::new("on", sender(), "|ON@"),
                RouteConfig::new("off", sender(), "|OFF@"),
            ],
            RequestIds::new(),
        )
    }

    #[test]
    fn test_on_frame_routes_to_on_command() {
        let decoder = NotificationDecoder::new(vec![
            CommandToken::contains("on", "TEST1@"),
            CommandToken::contains("off", "TEST2@"),
        ]);
        let message = decoder.decode(listener(), b"TEST1@\n");

        let request = router().route(&message).expect("routed");
        assert_eq!(request.target(), sender());
        assert_eq!(request.payload(), b"|ON@");
        assert_eq!(
            request.origin(),
            &RequestOrigin::Routed {
                category: "on".to_string()
            }
        );
        assert!(!request.has_completion());
    }

    #[test]
    fn test_unclassified_message_is_not_routed() {
        let decoder = NotificationDecoder::new(vec![CommandToken::contains("on", "TEST1@")]);
        let message = decoder.decode(listener(), b"noise\n");
        assert!(router().route(&message).is_none());
    }

    #[test]
    fn test_category_without_route() {
        let decoder = NotificationDecoder::new(vec![CommandToken::contains("dim", "TEST3@")]);
        let message = decoder.decode(listener(), b"TEST3@");
        assert!(router().route(&message).is_none());
    }

    #[test]
    fn test_requests_get_fresh_ids() {
        let decoder = NotificationDecoder::new(vec![CommandToken::contains("off", "TEST2@")]);
        let message = decoder.decode(listener(), b"TEST2@");
        let router = router();
        let first = router.route(&message).unwrap();
        let second = router.route(&message).unwrap();
        assert_ne!(first.id(), second.id());
    }
}
