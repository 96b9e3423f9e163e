// Darknet YOLOv3 输出解码
// 输出布局: [anchors, 5 + nc] (或带 batch 维), 每行 [cx, cy, w, h, obj, cls0, ...]
// 坐标相对于画面 (0..1), 直接乘以原始画面宽高

use anyhow::{bail, Result};
use ndarray::{s, ArrayViewD, Axis, Ix2};

use super::{argmax, DecodeParams};
use crate::detection::{Bbox, Detection};

const CLASS_OFFSET: usize = 5;

pub fn decode(preds: ArrayViewD<'_, f32>, params: &DecodeParams) -> Result<Vec<Detection>> {
    let preds = match preds.ndim() {
        3 => preds.index_axis_move(Axis(0), 0),
        2 => preds,
        n => bail!("unexpected Darknet output rank {n}"),
    };
    let preds = preds.into_dimensionality::<Ix2>()?;
    if preds.ncols() <= CLASS_OFFSET {
        bail!("Darknet output has no class scores: {:?}", preds.shape());
    }

    let (w0, h0) = (params.frame_width, params.frame_height);
    let mut data = Vec::new();
    for row in preds.axis_iter(Axis(0)) {
        // 置信度取类别分数本身, objectness 不参与
        let Some((id, confidence)) = argmax(row.slice(s![CLASS_OFFSET..]).iter().copied()) else {
            continue;
        };
        if id != params.target_class || confidence <= params.conf_threshold {
            continue;
        }

        let bbox = Bbox::from_cxcywh(row[0] * w0, row[1] * h0, row[2] * w0, row[3] * h0)
            .clamp_to(w0, h0);
        if bbox.area() <= 0. {
            continue;
        }
        data.push(Detection::new(
            bbox,
            id,
            params.target_label.clone(),
            confidence,
        ));
    }
    Ok(data)
}
