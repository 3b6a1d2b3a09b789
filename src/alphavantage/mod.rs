// Client for the Alpha Vantage daily series functions.
pub mod api_caller;
// Wire format of the daily series responses.
pub mod response;
