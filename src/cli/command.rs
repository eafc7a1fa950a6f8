use std::path::PathBuf;

/// One CLI action, independent of argument parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Dev data
    Import { dir: PathBuf },
    Delete,
    // Tours
    Tours { query: String },
    Tour { id: String },
    TopTours { query: String },
    Stats,
    MonthlyPlan { year: String },
    Within { distance: String, latlng: String, unit: String },
    Distances { latlng: String, unit: String },
    // Reviews
    Reviews { tour: Option<String>, query: String },
    ReviewCreate { tour: String, user: String, review: String, rating: f64 },
    ReviewDelete { id: String },
    // Bookings
    Book { tour: String, user: String },
    MyTours { user: String },
    // Store maintenance
    Compact,
}
