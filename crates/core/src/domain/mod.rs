pub mod client;
pub mod commande;
pub mod delivery;
pub mod entity;
pub mod lead;
pub mod transfer;
