pub mod request_details;
