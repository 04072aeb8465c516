//! Request and notification identifiers.
//!
//! An identifier names the component that serves it (`address`) and what
//! it is (`topic`).  The numeric message id is derived from both at
//! compile time, so id tables can be `const`.

use core::fmt;

use crate::message::{MessageId, create_identifier};

macro_rules! service_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            address: &'static str,
            topic: &'static str,
            id: MessageId,
        }

        impl $name {
            pub const fn new(address: &'static str, topic: &'static str) -> Self {
                Self {
                    address,
                    topic,
                    id: create_identifier(address, topic),
                }
            }

            /// Identifier of the serving component.
            pub const fn address(&self) -> &'static str {
                self.address
            }

            pub const fn topic(&self) -> &'static str {
                self.topic
            }

            pub const fn message_id(&self) -> MessageId {
                self.id
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}.{}", self.address, self.topic)
            }
        }
    };
}

service_id!(
    /// A request served by the component at `address`.
    RequestId
);

service_id!(
    /// A notification published by the component at `address`.
    NotificationId
);
