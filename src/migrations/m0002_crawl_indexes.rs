use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_crawl_indexes")
        .depends_on(&["0001_initial_schema"])
        .operation(AddIndex::new(
            "communities",
            Index::new("idx_communities_status").column("status"),
        ))
        // Pending scans read (frontier, processed) and order by (depth, name)
        .operation(AddIndex::new(
            "frontier_entries",
            Index::new("idx_frontier_entries_processed")
                .column("frontier")
                .column("processed")
                .column("depth")
                .column("name"),
        ))
        .operation(AddIndex::new(
            "edges",
            Index::new("idx_edges_kind_source").column("kind").column("source"),
        ))
        .operation(AddIndex::new(
            "edges",
            Index::new("idx_edges_kind_target").column("kind").column("target"),
        ))
}
