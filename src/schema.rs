// Table definitions for the five persisted collections.
//
// Timestamps are fixed-width UTC RFC 3339 text (microseconds, `Z` suffix)
// so lexicographic comparison equals chronological comparison on both
// backends.

diesel::table! {
    tickets (tenant_id, external_id) {
        tenant_id -> Text,
        external_id -> Text,
        customer_id -> Text,
        source -> Text,
        subject -> Text,
        message -> Text,
        status -> Text,
        urgency -> Text,
        sentiment -> Text,
        requires_action -> Bool,
        created_at -> Text,
        updated_at -> Text,
        deleted_at -> Nullable<Text>,
    }
}

diesel::table! {
    ingestion_jobs (job_id) {
        job_id -> Text,
        tenant_id -> Text,
        status -> Text,
        started_at -> Text,
        ended_at -> Nullable<Text>,
        total_pages -> Nullable<Integer>,
        processed_pages -> Integer,
        progress -> Integer,
    }
}

diesel::table! {
    ingestion_logs (id) {
        id -> Integer,
        tenant_id -> Text,
        job_id -> Text,
        status -> Text,
        started_at -> Text,
        ended_at -> Text,
        new_ingested -> Integer,
        updated -> Integer,
        errors -> Integer,
        error -> Nullable<Text>,
    }
}

diesel::table! {
    ticket_history (id) {
        id -> Integer,
        ticket_id -> Text,
        tenant_id -> Text,
        action -> Text,
        changes -> Text,
        recorded_at -> Text,
    }
}

diesel::table! {
    distributed_locks (resource_id) {
        resource_id -> Text,
        owner_id -> Text,
        acquired_at -> Text,
        expires_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    tickets,
    ingestion_jobs,
    ingestion_logs,
    ticket_history,
    distributed_locks,
);
