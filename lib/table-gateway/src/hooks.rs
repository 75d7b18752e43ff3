//! Lifecycle hooks for DAO operations.
//!
//! Callbacks are registered per event and run in registration order. A
//! callback may modify the payload (the values about to be written, the
//! query about to run, the rows just read) or abort the operation by
//! returning an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{GatewayError, Query, Row, Value};

/// Events fired by `Dao` and `EntityDao`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    Constructing,
    Constructed,
    NewQuery,
    Selecting,
    Selected,
    Inserting,
    Inserted,
    Updating,
    Updated,
    Deleting,
    Deleted,
    Creating,
    Created,
    Saving,
    Saved,
    Loading,
    Loaded,
    Removing,
    Removed,
}

/// Data handed to a hook callback.
#[derive(Debug)]
pub enum HookPayload<'a> {
    None,
    Query(&'a mut Query),
    Row(&'a mut Row),
    Rows(&'a mut Vec<Row>),
    Id(&'a Value),
}

pub type HookFn = Arc<dyn Fn(&mut HookPayload<'_>) -> Result<(), GatewayError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    handlers: HashMap<HookEvent, Vec<HookFn>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`.
    pub fn on<F>(&mut self, event: HookEvent, callback: F)
    where
        F: Fn(&mut HookPayload<'_>) -> Result<(), GatewayError> + Send + Sync + 'static,
    {
        self.handlers
            .entry(event)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Number of callbacks registered for `event`.
    pub fn count(&self, event: HookEvent) -> usize {
        self.handlers.get(&event).map_or(0, Vec::len)
    }

    /// Run every callback for `event`, stopping at the first error.
    pub fn fire(
        &self,
        event: HookEvent,
        payload: &mut HookPayload<'_>,
    ) -> Result<(), GatewayError> {
        let Some(handlers) = self.handlers.get(&event) else {
            return Ok(());
        };
        tracing::trace!(?event, handlers = handlers.len(), "firing hooks");
        for handler in handlers {
            handler(payload)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .handlers
            .iter()
            .map(|(event, handlers)| (*event, handlers.len()))
            .collect();
        counts.sort_by_key(|(event, _)| format!("{:?}", event));
        f.debug_struct("Hooks").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[test]
    fn callbacks_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::new();
        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            hooks.on(HookEvent::Inserting, move |_| {
                seen.lock().unwrap().push(name);
                Ok(())
            });
        }

        hooks.fire(HookEvent::Inserting, &mut HookPayload::None).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(hooks.count(HookEvent::Inserting), 3);
        assert_eq!(hooks.count(HookEvent::Inserted), 0);
    }

    #[test]
    fn callbacks_can_modify_rows() {
        let mut hooks = Hooks::new();
        hooks.on(HookEvent::Updating, |payload| {
            if let HookPayload::Row(row) = payload {
                row.insert("status".to_string(), Value::Int(2));
            }
            Ok(())
        });

        let mut row = Row::new();
        hooks
            .fire(HookEvent::Updating, &mut HookPayload::Row(&mut row))
            .unwrap();
        assert_eq!(row.get("status"), Some(&Value::Int(2)));
    }

    #[test]
    fn an_error_stops_later_callbacks() {
        let ran = Arc::new(Mutex::new(false));
        let mut hooks = Hooks::new();
        hooks.on(HookEvent::Deleting, |_| {
            Err(GatewayError::Configuration("deletes are disabled".to_string()))
        });
        let flag = ran.clone();
        hooks.on(HookEvent::Deleting, move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        assert!(hooks.fire(HookEvent::Deleting, &mut HookPayload::None).is_err());
        assert!(!*ran.lock().unwrap());
    }
}
