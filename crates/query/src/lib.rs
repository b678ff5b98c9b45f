pub mod builder;
pub mod profile;

pub use builder::{
    MAX_POSITIONS, QueryError, SearchQuery, SearchSite, TopicQueryOptions, build_coworker_queries,
    build_topic_query, encode_topic,
};
pub use profile::{PositionRecord, SubjectProfile};
