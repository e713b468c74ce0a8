diesel::table! {
    hotels (id) {
        id -> Int8,
        name -> Varchar,
        daily_rate -> Numeric,
    }
}

diesel::table! {
    packages (id) {
        id -> Int8,
        name -> Varchar,
        price_per_person -> Numeric,
    }
}

diesel::table! {
    reservations (id) {
        id -> Uuid,
        user_id -> Int8,
        hotel_id -> Nullable<Int8>,
        package_id -> Nullable<Int8>,
        status -> Varchar,
        start_date -> Date,
        end_date -> Date,
        travel_date -> Nullable<Date>,
        party_size -> Int4,
        total_amount -> Numeric,
        payment_intent_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    payments (id) {
        id -> Uuid,
        reservation_id -> Uuid,
        method -> Varchar,
        status -> Varchar,
        amount -> Numeric,
        receipt -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    reviews (id) {
        id -> Int8,
        hotel_id -> Int8,
        user_id -> Int8,
        score -> Int4,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Nullable<Bool>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(payments -> reservations (reservation_id));
diesel::joinable!(reviews -> hotels (hotel_id));

diesel::allow_tables_to_appear_in_same_query!(
    hotels,
    packages,
    reservations,
    payments,
    reviews,
    outbox_events,
);
