//! Newtypes for Scaleway lifecycle values to avoid stringly-typed code.

use std::ops::Deref;

use serde::Deserialize;

macro_rules! newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
        #[serde(transparent)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }
    };
}

newtype!(Zone);
newtype!(Action);
