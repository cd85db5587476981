mod frame_split;
mod schema_errors;
