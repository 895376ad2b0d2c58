pub mod health;
pub mod params;
pub mod datastore_handlers;
pub mod entry_handlers;
pub mod version_handlers;

#[cfg(test)]
pub(crate) mod test_support;
