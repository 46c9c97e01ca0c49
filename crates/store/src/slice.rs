use core::fmt;
use core::ops::Deref;
use std::borrow::Cow;

/// A byte slice that may borrow from the backend or own its data.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slice<'a>(Cow<'a, [u8]>);

impl<'a> Slice<'a> {
    #[must_use]
    pub fn into_boxed(self) -> Box<[u8]> {
        match self.0 {
            Cow::Borrowed(bytes) => bytes.into(),
            Cow::Owned(bytes) => bytes.into_boxed_slice(),
        }
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.0.into_owned()
    }

    #[must_use]
    pub fn owned(self) -> Slice<'static> {
        Slice(Cow::Owned(self.0.into_owned()))
    }
}

impl Deref for Slice<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Slice<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> From<&'a [u8]> for Slice<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self(Cow::Borrowed(bytes))
    }
}

impl From<Vec<u8>> for Slice<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Cow::Owned(bytes))
    }
}

impl From<Box<[u8]>> for Slice<'static> {
    fn from(bytes: Box<[u8]>) -> Self {
        Self(Cow::Owned(bytes.into_vec()))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Slice<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Self(Cow::Borrowed(bytes))
    }
}

impl fmt::Debug for Slice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slice({} bytes)", self.0.len())
    }
}
