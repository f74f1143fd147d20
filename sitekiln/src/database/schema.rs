/*
 *  Copyright 2025 Sitekiln Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Diesel schema for the `jobs` and `tasks` tables.
//!
//! Column order must match the migrations in `migrations/`.

diesel::table! {
    jobs (id) {
        id -> Text,
        domain -> Text,
        status -> Text,
        created_at -> Timestamp,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        total_tasks -> Integer,
        completed_tasks -> Integer,
        failed_tasks -> Integer,
        progress -> Float,
        error_message -> Nullable<Text>,
        use_sitemap -> Bool,
        find_links -> Bool,
        max_depth -> Integer,
        max_pages -> Integer,
        concurrency -> Integer,
        include_paths -> Text,
        exclude_paths -> Text,
    }
}

diesel::table! {
    tasks (id) {
        id -> Text,
        job_id -> Text,
        page_id -> Nullable<Integer>,
        path -> Text,
        depth -> Integer,
        source_type -> Text,
        source_url -> Text,
        status -> Text,
        created_at -> Timestamp,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        retry_count -> Integer,
        error -> Nullable<Text>,
        status_code -> Nullable<Integer>,
        response_time_ms -> Nullable<BigInt>,
        cache_status -> Nullable<Text>,
        content_type -> Nullable<Text>,
    }
}

diesel::joinable!(tasks -> jobs (job_id));

diesel::allow_tables_to_appear_in_same_query!(jobs, tasks);
