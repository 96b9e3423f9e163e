// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 输出解码
// 输出布局: [1, 4 + nc, anchors], 每列 [cx, cy, w, h, cls0, cls1, ...]
// 坐标为模型输入像素, 需按比例还原到原始画面

use anyhow::{bail, Result};
use ndarray::{s, ArrayViewD, Axis, Ix2};

use super::{argmax, DecodeParams};
use crate::detection::{Bbox, Detection};

const CXYWH_OFFSET: usize = 4;

pub fn decode(preds: ArrayViewD<'_, f32>, params: &DecodeParams) -> Result<Vec<Detection>> {
    let preds = match preds.ndim() {
        3 => preds.index_axis_move(Axis(0), 0),
        2 => preds,
        n => bail!("unexpected YOLOv8 output rank {n}"),
    };
    let preds = preds.into_dimensionality::<Ix2>()?;

    // 部分导出工具会转置为 [anchors, 4 + nc]
    let rows = CXYWH_OFFSET + params.num_classes;
    let preds = if preds.nrows() == rows {
        preds
    } else if preds.ncols() == rows {
        preds.reversed_axes()
    } else {
        bail!(
            "YOLOv8 output {:?} does not match {} classes",
            preds.shape(),
            params.num_classes
        );
    };

    let scale_x = params.frame_width / params.input_width;
    let scale_y = params.frame_height / params.input_height;

    let mut data = Vec::new();
    for pred in preds.axis_iter(Axis(1)) {
        let clss = pred.slice(s![CXYWH_OFFSET..]);
        let Some((id, confidence)) = argmax(clss.iter().copied()) else {
            continue;
        };
        if id != params.target_class || confidence <= params.conf_threshold {
            continue;
        }

        let bbox = Bbox::from_cxcywh(
            pred[0] * scale_x,
            pred[1] * scale_y,
            pred[2] * scale_x,
            pred[3] * scale_y,
        )
        .clamp_to(params.frame_width, params.frame_height);
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
