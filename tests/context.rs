//! Verifies that border cropping keeps every extracted sample inside the image

use ndarray::Array3;
use pixelfit::io::configuration::BorderSplit;
use pixelfit::spatial::{Context, Position, StructuringElement};

// Checks the combined extents at `position` and walks the training region
fn assert_inside(context: &mut Context, image: &Array3<f64>, position: Position) {
    let [slices, rows, cols] = context.shape();
    let [z, y, x] = position;
    context.check_border(position);

    assert!(context.left() <= x, "{position:?}: left {}", context.left());
    assert!(x + context.right() < cols, "{position:?}: right {}", context.right());
    assert!(context.top() <= y, "{position:?}: top {}", context.top());
    if context.front() > 0 {
        assert!(y + context.bottom() < rows, "{position:?}: bottom {}", context.bottom());
        assert!(context.front() <= z, "{position:?}: front {}", context.front());
    }
    assert!(z < slices);

    let mut vector = Vec::new();
    context.current_vector(image, position, &mut vector);
    assert_eq!(vector.len(), context.neighborhood().len());

    context.begin_training(position);
    let mut visited = 0;
    while let Some(sample) = context.next_training_vector(image, &mut vector) {
        assert!(sample[1] < rows && sample[2] < cols, "{sample:?}");
        assert_eq!(vector.len(), context.neighborhood().len());
        visited += 1;
    }
    assert_eq!(visited, context.training_len());
}

fn is_interior(context: &Context, position: Position) -> bool {
    let [_, rows, cols] = context.shape();
    let [z, y, x] = position;
    let full_left = context.full_neighborhood().left() + context.full_training_region().left();
    let full_right = context.full_neighborhood().right() + context.full_training_region().right();
    let full_top = context.full_neighborhood().top() + context.full_training_region().top();
    let full_bottom =
        context.full_neighborhood().bottom() + context.full_training_region().bottom();
    let full_front = context.full_neighborhood().front() + context.full_training_region().front();
    x >= full_left
        && x + full_right < cols
        && y >= full_top
        && y + full_bottom < rows
        && z >= full_front
}

fn sweep(mut context: Context, shape: [usize; 3], buffered: bool) -> usize {
    context.bind(shape, buffered);
    let image = Array3::from_shape_fn(shape, |(z, y, x)| (z * 100 + y * 10 + x) as f64);
    let mut interior = 0;
    for z in 0..shape[0] {
        for y in 0..shape[1] {
            for x in 0..shape[2] {
                let position = [z, y, x];
                assert_inside(&mut context, &image, position);
                if is_interior(&context, position) {
                    interior += 1;
                    assert!(!context.is_border(), "{position:?}");
                    assert_eq!(context.neighborhood(), context.full_neighborhood());
                    assert_eq!(context.training_region(), context.full_training_region());
                }
            }
        }
    }
    interior
}

#[test]
fn test_planar_context_stays_inside_at_every_position() {
    let context = Context::new(
        StructuringElement::half_ellipse(2.5, 3.0, 3.5, true),
        StructuringElement::half_square(4, false),
        BorderSplit::default(),
    );
    assert!(sweep(context.clone(), [1, 16, 19], true) > 0);
    sweep(context, [1, 3, 2], false);
}

#[test]
fn test_med_context_on_a_single_row() {
    let context = Context::new(
        StructuringElement::half_ellipse(1.5, 1.5, 0.5, true),
        StructuringElement::half_square(2, false),
        BorderSplit::default(),
    );
    sweep(context, [1, 1, 9], true);
}

#[test]
fn test_volumetric_context_stays_inside_at_every_position() {
    let context = Context::new(
        StructuringElement::half_sphere(1.5, true),
        StructuringElement::half_cube(2, 1, false),
        BorderSplit::default(),
    );
    assert!(sweep(context, [4, 9, 9], true) > 0);
}

#[test]
fn test_unsplit_borders_favour_the_neighborhood() {
    let split = BorderSplit {
        top: 0,
        left: 0,
        right: 0,
        bottom: 0,
        front: 0,
    };
    let mut context = Context::new(
        StructuringElement::half_ellipse(2.5, 3.0, 3.5, true),
        StructuringElement::half_square(4, false),
        split,
    );
    context.bind([1, 12, 12], false);
    context.check_border([0, 3, 3]);
    // The neighborhood keeps every sample it can reach
    assert_eq!(context.neighborhood().left(), 3);
    assert_eq!(context.neighborhood().top(), 2);
    assert_eq!(context.training_region().left(), 0);
}
