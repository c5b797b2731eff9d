// Identity module - WHO A NODE IS
// Seed-derived ed25519 keypairs and the public key used as peer identifier

mod keypair;

pub use keypair::*;
