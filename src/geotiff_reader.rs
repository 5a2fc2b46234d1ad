//! GeoTIFF reader for scene assets and stored tiles.
//!
//! Stored tiles are small and read whole. Scene assets are read through
//! [`read_window`], which decodes only the strips or tiles a window touches
//! and keeps them in the [`crate::band_cache`]. Both paths understand the
//! georeferencing tags that [`crate::geotiff_writer`] writes: pixel scale +
//! tiepoint or a model transformation, the EPSG code from the GeoKey
//! directory, and the GDAL nodata tag.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::ops::Range;
use std::path::Path;

use tiff::decoder::{ChunkType, Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::trace;

use crate::band_cache;
use crate::casting::{u32_to_usize, usize_to_u32};
use crate::error::{Result, TileGridError};
use crate::geometry::{GeoTransform, PixelWindow};
use crate::geotiff_writer::{GEOGRAPHIC_TYPE_GEO_KEY, PROJECTED_CS_TYPE_GEO_KEY};
use crate::raster::{GeoRaster, MaskedBand};

/// Georeferencing of a GeoTIFF without its pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterHeader {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: i32,
    pub nodata: Option<f32>,
}

/// Decode a GeoTIFF file
///
/// # Errors
/// Returns `Io` if the file cannot be opened, `Encoding` if decoding fails, or
/// `InvalidData` if georeferencing is missing.
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<GeoRaster> {
    let file = File::open(path)?;
    decode(BufReader::new(file))
}

/// Decode GeoTIFF bytes, e.g. an object fetched from a store
///
/// # Errors
/// See [`read_geotiff`].
pub fn read_geotiff_bytes(bytes: &[u8]) -> Result<GeoRaster> {
    decode(std::io::Cursor::new(bytes))
}

/// Read only the tags of a GeoTIFF file, used when cataloging scenes.
///
/// # Errors
/// See [`read_geotiff`].
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<RasterHeader> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;
    header(&mut decoder)
}

/// Read a pixel window of the first band of a GeoTIFF file.
///
/// Only the strips or tiles intersecting the window are decoded; decoded
/// chunks are cached by path and chunk index. Pixels outside the image or
/// equal to its nodata value come back masked.
///
/// # Errors
/// Returns `Io` if the file cannot be opened, `Encoding` if a chunk fails to
/// decode, or `InvalidData` if a chunk does not hold whole pixels.
pub fn read_window<P: AsRef<Path>>(path: P, window: &PixelWindow) -> Result<MaskedBand> {
    let path = path.as_ref();
    let source = path.to_string_lossy();
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (u32_to_usize(width)?, u32_to_usize(height)?);
    let nodata = read_nodata(&mut decoder)?;
    let grid = ChunkGrid::of(&decoder, width, height)?;

    let mut out = MaskedBand::masked(window.width, window.height);
    let (Some((cols, skip_x)), Some((rows, skip_y))) = (
        clip(window.col_off, window.width, width),
        clip(window.row_off, window.height, height),
    ) else {
        return Ok(out);
    };

    for chunk_row in rows.start / grid.chunk_height..=(rows.end - 1) / grid.chunk_height {
        for chunk_col in cols.start / grid.chunk_width..=(cols.end - 1) / grid.chunk_width {
            let index = chunk_row * grid.across + chunk_col;
            let (x0, y0) = (chunk_col * grid.chunk_width, chunk_row * grid.chunk_height);
            let (data_width, data_height) = grid.data_dims(x0, y0);
            let data = band_cache::get_or_load(&source, index, || {
                trace!(path = %source, chunk = index, "Decoding chunk");
                read_band_chunk(&mut decoder, index, data_width, data_height)
            })?;

            for y in rows.start.max(y0)..rows.end.min(y0 + data_height) {
                let out_row = (y - rows.start + skip_y) * window.width;
                for x in cols.start.max(x0)..cols.end.min(x0 + data_width) {
                    let value = data[(y - y0) * data_width + (x - x0)];
                    if value.is_nan() || nodata.is_some_and(|nd| value == nd) {
                        continue;
                    }
                    let idx = out_row + x - cols.start + skip_x;
                    out.data[idx] = value;
                    out.mask[idx] = false;
                }
            }
        }
    }
    Ok(out)
}

/// Strip or tile layout of an image
#[derive(Debug, Clone, Copy)]
struct ChunkGrid {
    width: usize,
    height: usize,
    chunk_width: usize,
    chunk_height: usize,
    /// Chunks per chunk row
    across: usize,
}

impl ChunkGrid {
    fn of<R: Read + Seek>(decoder: &Decoder<R>, width: usize, height: usize) -> Result<Self> {
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        let chunk_width = match decoder.get_chunk_type() {
            ChunkType::Strip => width,
            ChunkType::Tile => u32_to_usize(chunk_width)?,
        };
        let chunk_height = u32_to_usize(chunk_height)?;
        if chunk_width == 0 || chunk_height == 0 {
            return Err(TileGridError::invalid_data("GeoTIFF has empty strips or tiles"));
        }
        Ok(Self {
            width,
            height,
            chunk_width,
            chunk_height,
            across: width.div_ceil(chunk_width),
        })
    }

    /// Size of the chunk starting at `(x0, y0)` without edge padding
    fn data_dims(&self, x0: usize, y0: usize) -> (usize, usize) {
        (
            self.chunk_width.min(self.width - x0),
            self.chunk_height.min(self.height - y0),
        )
    }
}

/// Pixels of the window along one axis that fall inside `0..limit`, and how
/// many window pixels precede them
fn clip(offset: i64, len: usize, limit: usize) -> Option<(Range<usize>, usize)> {
    let start = offset.max(0);
    let end = offset
        .saturating_add(i64::try_from(len).ok()?)
        .min(i64::try_from(limit).ok()?);
    if start >= end {
        return None;
    }
    Some((
        usize::try_from(start).ok()?..usize::try_from(end).ok()?,
        usize::try_from(start - offset).ok()?,
    ))
}

/// Decode one chunk and keep its first sample per pixel
fn read_band_chunk<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    index: usize,
    data_width: usize,
    data_height: usize,
) -> Result<Vec<f32>> {
    let samples = to_f32(decoder.read_chunk(usize_to_u32(index)?)?);
    let pixels = data_width * data_height;
    if pixels == 0 || samples.len() % pixels != 0 {
        return Err(TileGridError::invalid_data(format!(
            "Chunk {index} has {} samples for {data_width}x{data_height} pixels",
            samples.len()
        )));
    }
    let per_pixel = samples.len() / pixels;
    if per_pixel == 1 {
        return Ok(samples);
    }
    Ok(samples.into_iter().step_by(per_pixel).collect())
}

fn header<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<RasterHeader> {
    let (width, height) = decoder.dimensions()?;
    Ok(RasterHeader {
        width: u32_to_usize(width)?,
        height: u32_to_usize(height)?,
        transform: read_transform(decoder)?,
        crs: read_epsg(decoder)?,
        nodata: read_nodata(decoder)?,
    })
}

fn decode<R: Read + Seek>(reader: R) -> Result<GeoRaster> {
    let mut decoder = Decoder::new(reader)?;
    let RasterHeader {
        width,
        height,
        transform,
        crs,
        nodata,
    } = header(&mut decoder)?;

    let pixels = to_f32(decoder.read_image()?);
    let count = width * height;
    if count == 0 || pixels.len() % count != 0 {
        return Err(TileGridError::invalid_data(format!(
            "{} samples do not fill a {width}x{height} image",
            pixels.len()
        )));
    }

    Ok(GeoRaster {
        bands: pixels.len() / count,
        pixels,
        width,
        height,
        transform,
        crs,
        nodata,
    })
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(matrix) = decoder
        .find_tag(Tag::ModelTransformationTag)?
        .map(tiff::decoder::ifd::Value::into_f64_vec)
        .transpose()?
    {
        if matrix.len() < 8 {
            return Err(TileGridError::invalid_data("ModelTransformation has fewer than 8 values"));
        }
        return Ok(GeoTransform::new(
            matrix[0], matrix[1], matrix[3], matrix[4], matrix[5], matrix[7],
        ));
    }

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .map(tiff::decoder::ifd::Value::into_f64_vec)
        .transpose()?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .map(tiff::decoder::ifd::Value::into_f64_vec)
        .transpose()?;

    match (scale, tiepoint) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            // Tiepoint maps raster (i, j) to model (x, y)
            let (sx, sy) = (scale[0], scale[1]);
            let origin_x = tie[3] - tie[0] * sx;
            let origin_y = tie[4] + tie[1] * sy;
            Ok(GeoTransform::north_up(origin_x, origin_y, sx, sy))
        }
        _ => Err(TileGridError::invalid_data("GeoTIFF has no georeferencing")),
    }
}

fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<i32> {
    let Some(keys) = decoder
        .find_tag(Tag::GeoKeyDirectoryTag)?
        .map(tiff::decoder::ifd::Value::into_u16_vec)
        .transpose()?
    else {
        return Err(TileGridError::invalid_data("GeoTIFF has no GeoKey directory"));
    };

    // Header is 4 shorts, then 4 shorts per key
    keys.get(4..)
        .unwrap_or_default()
        .chunks_exact(4)
        .find(|entry| {
            (entry[0] == PROJECTED_CS_TYPE_GEO_KEY || entry[0] == GEOGRAPHIC_TYPE_GEO_KEY)
                && entry[1] == 0
        })
        .map(|entry| i32::from(entry[3]))
        .ok_or_else(|| TileGridError::invalid_data("GeoKey directory has no EPSG code"))
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f32>> {
    let Some(value) = decoder.find_tag(Tag::GdalNodata)? else {
        return Ok(None);
    };
    let text = value.into_string()?;
    let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.eq_ignore_ascii_case("nan") {
        return Ok(Some(f32::NAN));
    }
    trimmed
        .parse::<f32>()
        .map(Some)
        .map_err(|_| TileGridError::invalid_data(format!("Unparseable nodata value {trimmed:?}")))
}

#[allow(clippy::cast_precision_loss)]
fn to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F16(v) => v.into_iter().map(|x| x.to_f32()).collect(),
        DecodingResult::F32(v) => v,
        #[allow(clippy::cast_possible_truncation)]
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(bands: usize, transform: GeoTransform, crs: i32) -> GeoRaster {
        #[allow(clippy::cast_precision_loss)]
        let pixels = (0..6 * 4 * bands).map(|i| i as f32 * 0.5).collect();
        GeoRaster {
            pixels,
            bands,
            width: 6,
            height: 4,
            transform,
            crs,
            nodata: Some(-9999.0),
        }
    }

    #[test]
    fn test_single_band_north_up() {
        let original = raster(1, GeoTransform::north_up(-46.7, -23.5, 0.001, 0.002), 4326);
        let decoded = read_geotiff_bytes(&original.to_geotiff_bytes().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_four_band_projected() {
        let original = raster(4, GeoTransform::north_up(300_000.0, 7_400_000.0, 10.0, 10.0), 32723);
        let decoded = read_geotiff_bytes(&original.to_geotiff_bytes().unwrap()).unwrap();
        assert_eq!(decoded.bands, 4);
        assert_eq!(decoded.crs, 32723);
        assert_eq!(decoded.transform, original.transform);
        assert_eq!(decoded.pixels, original.pixels);
        assert_eq!(decoded.nodata, Some(-9999.0));
    }

    #[test]
    fn test_rotated_transform() {
        let t = GeoTransform::new(10.0, 0.5, 300_000.0, -0.5, -10.0, 7_400_000.0);
        let original = raster(1, t, 32723);
        let decoded = read_geotiff_bytes(&original.to_geotiff_bytes().unwrap()).unwrap();
        assert_eq!(decoded.transform, t);
    }

    #[test]
    fn test_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("B04.tif");
        let original = raster(1, GeoTransform::north_up(10.0, 20.0, 0.5, 0.5), 4326);
        original.write_geotiff(&path).unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!((header.width, header.height), (6, 4));
        assert_eq!(header.transform, original.transform);
        assert_eq!(header.crs, 4326);
        assert_eq!(header.nodata, Some(-9999.0));
        assert_eq!(read_geotiff(&path).unwrap(), original);
    }

    fn large_band(path: &Path) {
        // 2000 x 2000 float32 rows of 8000 bytes land in 125-row strips
        #[allow(clippy::cast_precision_loss)]
        let pixels = (0..2000 * 2000).map(|i| i as f32).collect();
        GeoRaster {
            pixels,
            bands: 1,
            width: 2000,
            height: 2000,
            transform: GeoTransform::north_up(300_000.0, 7_400_000.0, 10.0, 10.0),
            crs: 32723,
            nodata: Some(-9999.0),
        }
        .write_geotiff(path)
        .unwrap();
    }

    #[test]
    fn test_read_window_decodes_only_intersecting_strip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("B04.tif");
        large_band(&path);
        let source = path.to_string_lossy().to_string();

        let band = read_window(&path, &PixelWindow::new(0, 0, 1, 1)).unwrap();
        assert_eq!((band.width, band.height), (1, 1));
        assert_eq!(band.get(0, 0), Some(0.0));
        assert_eq!(band_cache::cached_chunks(&source), 1);
        assert!(band_cache::contains(&source, 0));
        assert!(!band_cache::contains(&source, 1));
        assert_eq!(band_cache::get(&source, 0).unwrap().len(), 2000 * 125);
        band_cache::invalidate(&source);
    }

    #[test]
    fn test_read_window_across_strips_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("B08.tif");
        large_band(&path);
        let source = path.to_string_lossy().to_string();

        // Columns 1995..2005 and rows 120..130 straddle strips 0 and 1 and
        // run past the right edge
        let band = read_window(&path, &PixelWindow::new(1995, 120, 10, 10)).unwrap();
        assert_eq!(band.get(0, 0), Some(120.0 * 2000.0 + 1995.0));
        assert_eq!(band.get(4, 9), Some(129.0 * 2000.0 + 1999.0));
        assert_eq!(band.get(5, 0), None);
        assert_eq!(band.valid_count(), 50);
        assert_eq!(band_cache::cached_chunks(&source), 2);

        // A window entirely outside decodes nothing
        let outside = read_window(&path, &PixelWindow::new(-20, 5, 10, 10)).unwrap();
        assert_eq!(outside.valid_count(), 0);
        assert_eq!(band_cache::cached_chunks(&source), 2);
        band_cache::invalidate(&source);
    }

    #[test]
    fn test_read_window_matches_whole_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("B02.tif");
        let original = raster(1, GeoTransform::north_up(10.0, 20.0, 0.5, 0.5), 4326);
        original.write_geotiff(&path).unwrap();

        let window = PixelWindow::new(-1, 1, 4, 4);
        let band = read_window(&path, &window).unwrap();
        assert_eq!(band, crate::catalog::extract_window(&original, 0, &window));
        band_cache::invalidate(&path.to_string_lossy());
    }

    #[test]
    fn test_not_a_tiff() {
        assert!(read_geotiff_bytes(b"definitely not a tiff").is_err());
    }
}
