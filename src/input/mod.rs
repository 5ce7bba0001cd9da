pub mod image;

pub use self::image::{load_image_input, Normalization};
