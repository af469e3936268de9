// Makita State
// Host-side view of input state, used to answer script queries locally

pub mod tracker;

pub use tracker::KeyTracker;
