// src/scrape/providers/mod.rs
//! One adapter per marketplace, each implementing [`Marketplace`].

pub mod craigslist;
pub mod ebay;
pub mod etsy;
pub mod facebook;
pub mod mercari;
pub mod offerup;
pub mod poshmark;

pub use craigslist::CraigslistAdapter;
pub use ebay::EbayAdapter;
pub use etsy::EtsyAdapter;
pub use facebook::FacebookAdapter;
pub use mercari::MercariAdapter;
pub use offerup::OfferUpAdapter;
pub use poshmark::PoshmarkAdapter;
