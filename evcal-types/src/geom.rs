/// A 2-D point or direction vector in image-pixel coordinates.
///
/// Following this workspace's existing geometry crates, fixed-size linear
/// algebra is expressed with `nalgebra` rather than a hand-rolled tuple type.
pub type Vec2 = nalgebra::Vector2<f64>;
