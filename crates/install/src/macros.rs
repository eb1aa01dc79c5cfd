//! Macros for context builder helpers

/// Generate `new`, `with_<field>` setters, `with_event_sender` and `Default`
/// for a context struct that carries an `event_sender: Option<EventSender>`.
#[macro_export]
macro_rules! context_builder {
    ($name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        paste::paste! {
            impl $name {
                /// Create a new context with default values
                #[must_use]
                pub fn new() -> Self {
                    Self {
                        $($field: Default::default(),)*
                        event_sender: None,
                    }
                }

                $( #[must_use]
                pub fn [<with_ $field>](mut self, value: $ty) -> Self {
                    self.$field = value;
                    self
                } )*

                /// Set the event sender for progress reporting
                #[must_use]
                pub fn with_event_sender(mut self, sender: crossgrader_events::EventSender) -> Self {
                    self.event_sender = Some(sender);
                    self
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl crossgrader_events::EventEmitter for $name {
                fn event_sender(&self) -> Option<&crossgrader_events::EventSender> {
                    self.event_sender.as_ref()
                }
            }
        }
    };
}
