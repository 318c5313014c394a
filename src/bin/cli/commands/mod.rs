pub mod cards;
pub mod recent;
pub mod show;
pub mod whitelist;
