use serde::{Serialize, de::DeserializeOwned};

/// An opaque payload carrying a rewritable integer identifier.
///
/// The dispatch layer never looks inside the payload, it only reads and rewrites the
/// identifier so results can be matched with the steps that produced them.
pub trait Tagged: Serialize + DeserializeOwned + Send + 'static {
    /// Returns the identifier of this item.
    fn id(&self) -> u32;

    /// Overwrites the identifier of this item.
    fn set_id(&mut self, id: u32);
}

/// An elementary unit of work submitted by a client.
pub trait Step: Tagged {
    /// Returns an inert step, used to pad bunches to the engine's execution granularity.
    ///
    /// Engines must not produce any output for it.
    fn noop() -> Self;
}
