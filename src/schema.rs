// Kept in sync with repository::migrations by hand.

diesel::table! {
    communities (name) {
        name -> Text,
        status -> Text,
        attributes -> Nullable<Text>,
        moderators -> Nullable<Text>,
        searchable_text -> Nullable<Text>,
        created_at -> Nullable<Text>,
        moderator_status -> Text,
        fetch_attempts -> Integer,
        last_error -> Nullable<Text>,
        discovered_at -> Text,
        fetched_at -> Nullable<Text>,
    }
}

diesel::table! {
    moderator_accounts (username) {
        username -> Text,
        status -> Text,
        communities -> Nullable<Text>,
        skip -> Integer,
        fetch_attempts -> Integer,
        discovered_at -> Text,
        fetched_at -> Nullable<Text>,
    }
}

diesel::table! {
    frontier_entries (frontier, name) {
        frontier -> Text,
        name -> Text,
        processed -> Text,
        depth -> Integer,
        discovered_at -> Text,
        completed_at -> Nullable<Text>,
    }
}

diesel::table! {
    edges (id) {
        id -> Integer,
        kind -> Text,
        source -> Text,
        target -> Text,
        label -> Text,
        discovered_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(communities, frontier_entries, edges, moderator_accounts,);
