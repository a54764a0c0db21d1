//! Schema migrations, applied in dependency order by cetane.

mod m0001_initial;
mod m0002_crawl_indexes;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_initial::migration());
    reg.register(m0002_crawl_indexes::migration());
    reg
}
