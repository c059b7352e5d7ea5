//! Image preprocessing for the detector and embedder

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb};
use ndarray::Array4;
use anyhow::Result;

/// Input size for the embedding model
pub const EMBEDDER_INPUT_SIZE: (u32, u32) = (112, 112);

/// Letterbox a frame into a square detector input and convert it to NCHW
pub fn preprocess_for_detection(image: &DynamicImage, input_size: u32) -> Array4<f32> {
    let resized = resize_with_padding(image, input_size, input_size);
    image_to_nchw(&resized)
}

/// Resize image with padding to maintain aspect ratio
fn resize_with_padding(image: &DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let (orig_w, orig_h) = image.dimensions();

    let scale = f32::min(
        target_w as f32 / orig_w as f32,
        target_h as f32 / orig_h as f32,
    );

    let new_w = ((orig_w as f32 * scale) as u32).clamp(1, target_w);
    let new_h = ((orig_h as f32 * scale) as u32).clamp(1, target_h);

    // Triangle is plenty for a detector input and much cheaper than Lanczos on live frames
    let resized = image.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);

    let mut padded = ImageBuffer::from_pixel(target_w, target_h, Rgb([0u8, 0, 0]));
    let offset_x = (target_w - new_w) / 2;
    let offset_y = (target_h - new_h) / 2;
    image::imageops::replace(&mut padded, &resized.to_rgb8(), offset_x as i64, offset_y as i64);

    DynamicImage::ImageRgb8(padded)
}

/// Convert image to an NCHW tensor in BGR order, normalized to [-1, 1]
pub fn image_to_nchw(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = (pixel[2] as f32 - 127.5) / 128.0; // B
        tensor[[0, 1, y, x]] = (pixel[1] as f32 - 127.5) / 128.0; // G
        tensor[[0, 2, y, x]] = (pixel[0] as f32 - 127.5) / 128.0; // R
    }

    tensor
}

/// Reference landmark positions of a 112x112 aligned face
const ALIGNED_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Warp the face onto the 112x112 reference landmark layout
pub fn align_face(image: &DynamicImage, landmarks: &[(f32, f32); 5]) -> DynamicImage {
    let transform = estimate_similarity_transform(landmarks, &ALIGNED_LANDMARKS);
    let (w, h) = EMBEDDER_INPUT_SIZE;
    apply_affine_transform(image, &transform, w, h)
}

/// Least-squares similarity transform (Umeyama) mapping `src` onto `dst`.
/// Returns the 2x3 matrix `[scale*R | t]`.
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [[f32; 3]; 2] {
    let n = src.len() as f32;

    let centroid = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (src_cx, src_cy) = centroid(src);
    let (dst_cx, dst_cy) = centroid(dst);

    // Variance of src and covariance Sigma = 1/n * sum(dst_c * src_c^T)
    let mut var_src = 0.0f32;
    let (mut a, mut b, mut c, mut d) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    for (s, t) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (s.0 - src_cx, s.1 - src_cy);
        let (dx, dy) = (t.0 - dst_cx, t.1 - dst_cy);
        var_src += sx * sx + sy * sy;
        a += dx * sx;
        b += dx * sy;
        c += dy * sx;
        d += dy * sy;
    }
    var_src /= n;
    a /= n;
    b /= n;
    c /= n;
    d /= n;

    // Closed-form 2x2 SVD
    let e = (a + d) / 2.0;
    let f = (a - d) / 2.0;
    let g = (c + b) / 2.0;
    let h = (c - b) / 2.0;

    let q = (e * e + h * h).sqrt();
    let r = (f * f + g * g).sqrt();
    let s1 = q + r;
    let s2 = (q - r).abs();

    let a1 = h.atan2(e);
    let a2 = g.atan2(f);
    let theta = (a2 - a1) / 2.0;
    let phi = (a2 + a1) / 2.0;

    // Reflection guard: R = U * diag(1, sign(det)) * V^T
    let reflect = a * d - b * c < 0.0;
    let (r00, r01, r10, r11) = if !reflect {
        let angle = phi - theta;
        (angle.cos(), -angle.sin(), angle.sin(), angle.cos())
    } else {
        let angle = phi + theta;
        (angle.cos(), angle.sin(), angle.sin(), -angle.cos())
    };

    let trace = if reflect { s1 - s2 } else { s1 + s2 };
    let scale = if var_src > 1e-10 { trace / var_src } else { 1.0 };

    let tx = dst_cx - scale * (r00 * src_cx + r01 * src_cy);
    let ty = dst_cy - scale * (r10 * src_cx + r11 * src_cy);

    [
        [scale * r00, scale * r01, tx],
        [scale * r10, scale * r11, ty],
    ]
}

/// Backward-map every output pixel through the inverse transform with bilinear sampling
fn apply_affine_transform(
    image: &DynamicImage,
    transform: &[[f32; 3]; 2],
    out_width: u32,
    out_height: u32,
) -> DynamicImage {
    let rgb = image.to_rgb8();
    let mut output = ImageBuffer::from_pixel(out_width, out_height, Rgb([0u8, 0, 0]));

    let det = transform[0][0] * transform[1][1] - transform[0][1] * transform[1][0];
    if det.abs() < 1e-12 || rgb.width() < 2 || rgb.height() < 2 {
        return DynamicImage::ImageRgb8(output);
    }
    let inv = [
        [transform[1][1] / det, -transform[0][1] / det],
        [-transform[1][0] / det, transform[0][0] / det],
    ];
    let max_x = (rgb.width() - 1) as f32;
    let max_y = (rgb.height() - 1) as f32;

    for (x, y, out) in output.enumerate_pixels_mut() {
        let dx = x as f32 - transform[0][2];
        let dy = y as f32 - transform[1][2];
        let src_x = inv[0][0] * dx + inv[0][1] * dy;
        let src_y = inv[1][0] * dx + inv[1][1] * dy;

        if !(0.0..max_x).contains(&src_x) || !(0.0..max_y).contains(&src_y) {
            continue;
        }

        let (x0, y0) = (src_x as u32, src_y as u32);
        let (fx, fy) = (src_x - x0 as f32, src_y - y0 as f32);
        let p00 = rgb.get_pixel(x0, y0);
        let p10 = rgb.get_pixel(x0 + 1, y0);
        let p01 = rgb.get_pixel(x0, y0 + 1);
        let p11 = rgb.get_pixel(x0 + 1, y0 + 1);

        for ch in 0..3 {
            let v = p00[ch] as f32 * (1.0 - fx) * (1.0 - fy)
                + p10[ch] as f32 * fx * (1.0 - fy)
                + p01[ch] as f32 * (1.0 - fx) * fy
                + p11[ch] as f32 * fx * fy;
            out[ch] = v.clamp(0.0, 255.0) as u8;
        }
    }

    DynamicImage::ImageRgb8(output)
}

/// Decode image from bytes with EXIF orientation handling
/// Enrollment photos from phones usually carry an orientation tag instead of rotated pixels
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data)?;
    Ok(apply_exif_orientation(data, image))
}

fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    use std::io::Cursor;

    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    };

    // https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Mapping between letterboxed detector input and original frame coordinates
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    pub fn new(original: (u32, u32), input_size: u32) -> Self {
        let (orig_w, orig_h) = original;

        let scale = f32::min(
            input_size as f32 / orig_w as f32,
            input_size as f32 / orig_h as f32,
        );

        let new_w = ((orig_w as f32 * scale) as u32).clamp(1, input_size);
        let new_h = ((orig_h as f32 * scale) as u32).clamp(1, input_size);

        Self {
            scale,
            offset_x: (input_size - new_w) / 2,
            offset_y: (input_size - new_h) / 2,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    /// Convert detector coordinates back to original image space
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.offset_x as f32) / self.scale;
        let y = (y - self.offset_y as f32) / self.scale;
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_info_roundtrip_wide_frame() {
        let info = ResizeInfo::new((1280, 720), 640);
        assert!((info.scale - 0.5).abs() < 1e-6);
        assert_eq!(info.offset_x, 0);
        assert_eq!(info.offset_y, 140);

        // A point in the letterboxed input maps back into the source frame
        let (x, y) = info.to_original(320.0, 320.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_detection_tensor_shape_and_padding() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(200, 100, Rgb([255, 255, 255])));
        let tensor = preprocess_for_detection(&image, 64);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);

        // Top rows are black padding, centre is white
        let black = (0.0 - 127.5) / 128.0;
        let white = (255.0 - 127.5) / 128.0;
        assert!((tensor[[0, 0, 0, 32]] - black).abs() < 1e-6);
        assert!((tensor[[0, 0, 32, 32]] - white).abs() < 1e-2);
    }

    #[test]
    fn test_nchw_is_bgr() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(1, 1, Rgb([255, 0, 0])));
        let tensor = image_to_nchw(&image);
        assert!(tensor[[0, 2, 0, 0]] > 0.9); // R lands in channel 2
        assert!(tensor[[0, 0, 0, 0]] < -0.9);
    }

    #[test]
    fn test_similarity_transform_identity() {
        let t = estimate_similarity_transform(&ALIGNED_LANDMARKS, &ALIGNED_LANDMARKS);
        assert!((t[0][0] - 1.0).abs() < 1e-3);
        assert!((t[1][1] - 1.0).abs() < 1e-3);
        assert!(t[0][1].abs() < 1e-3 && t[1][0].abs() < 1e-3);
        assert!(t[0][2].abs() < 1e-2 && t[1][2].abs() < 1e-2);
    }

    #[test]
    fn test_similarity_transform_scale_and_shift() {
        let src = ALIGNED_LANDMARKS.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 + 5.0));
        let t = estimate_similarity_transform(&src, &ALIGNED_LANDMARKS);
        assert!((t[0][0] - 0.5).abs() < 1e-3);
        assert!((t[0][2] + 5.0).abs() < 1e-2);
        assert!((t[1][2] + 2.5).abs() < 1e-2);
    }

    #[test]
    fn test_align_face_output_size() {
        let image = DynamicImage::new_rgb8(300, 300);
        let aligned = align_face(&image, &ALIGNED_LANDMARKS);
        assert_eq!(aligned.dimensions(), EMBEDDER_INPUT_SIZE);
    }

    #[test]
    fn test_decode_without_exif_keeps_orientation() {
        let mut buffer = std::io::Cursor::new(Vec::new());
        DynamicImage::new_rgb8(6, 3)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_image(buffer.get_ref()).unwrap();
        assert_eq!(decoded.dimensions(), (6, 3));
    }
}
